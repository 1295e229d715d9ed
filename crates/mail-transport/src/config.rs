//! Transport configuration types.

use std::ops::{BitOr, BitOrAssign};
use std::time::Duration;

use rustls::pki_types::CertificateDer;

/// Timeout for establishing the TCP connection to one candidate address.
pub const SOCKET_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Idle timeout for reads once the connection is open.
pub const SOCKET_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Capacity of the buffered reader.
pub const READ_BUFFER_SIZE: usize = 1024;

/// Capacity of the buffered writer.
pub const WRITE_BUFFER_SIZE: usize = 512;

/// Longest line a read accepts before failing.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024; // 1 MB

/// Capability flags controlling how a transport connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Flags(u32);

impl Flags {
    /// Plain connection, full verification.
    pub const NONE: Self = Self(0);
    /// Upgrade to TLS right after the TCP connect.
    pub const ENCRYPT: Self = Self(0x01);
    /// Accept any certificate and skip hostname verification.
    ///
    /// **Insecure.** Only for servers known to present broken certificates.
    pub const TRUST_ALL: Self = Self(0x08);

    const ALL: u32 = Self::ENCRYPT.0 | Self::TRUST_ALL.0;

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Builds flags from raw bits, dropping unknown ones.
    #[must_use]
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::ALL)
    }

    /// Returns true if every flag in `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if no flag is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Sets the flags in `other`.
    pub const fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clears the flags in `other`.
    pub const fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    const fn with(mut self, other: Self, enabled: bool) -> Self {
        if enabled {
            self.insert(other);
        } else {
            self.remove(other);
        }
        self
    }
}

impl BitOr for Flags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Transport configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Capability flags.
    pub flags: Flags,
    /// Per-address connect timeout.
    pub connect_timeout: Duration,
    /// Read idle timeout.
    pub read_timeout: Duration,
    /// Buffered reader capacity.
    pub read_buffer_size: usize,
    /// Buffered writer capacity.
    pub write_buffer_size: usize,
    /// Longest line a read accepts, terminator excluded.
    pub max_line_length: usize,
    /// Trust anchors added to the bundled web PKI roots.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub extra_root_certificates: Vec<CertificateDer<'static>>,
}

impl Config {
    /// Creates a configuration with default timeouts and buffer sizes.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, flags: Flags) -> Self {
        Self {
            host: host.into(),
            port,
            flags,
            connect_timeout: SOCKET_CONNECT_TIMEOUT,
            read_timeout: SOCKET_READ_TIMEOUT,
            read_buffer_size: READ_BUFFER_SIZE,
            write_buffer_size: WRITE_BUFFER_SIZE,
            max_line_length: MAX_LINE_LENGTH,
            extra_root_certificates: Vec::new(),
        }
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(host)
    }

    /// Returns true if the connection is upgraded to TLS.
    #[must_use]
    pub const fn encrypts(&self) -> bool {
        self.flags.contains(Flags::ENCRYPT)
    }

    /// Returns true if certificate verification is disabled.
    #[must_use]
    pub const fn trusts_all_certificates(&self) -> bool {
        self.flags.contains(Flags::TRUST_ALL)
    }
}

/// Builder for transport configuration.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    host: String,
    port: Option<u16>,
    flags: Flags,
    connect_timeout: Duration,
    read_timeout: Duration,
    read_buffer_size: usize,
    write_buffer_size: usize,
    max_line_length: usize,
    extra_root_certificates: Vec<CertificateDer<'static>>,
}

impl ConfigBuilder {
    /// Creates a new builder with the given hostname.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            flags: Flags::NONE,
            connect_timeout: SOCKET_CONNECT_TIMEOUT,
            read_timeout: SOCKET_READ_TIMEOUT,
            read_buffer_size: READ_BUFFER_SIZE,
            write_buffer_size: WRITE_BUFFER_SIZE,
            max_line_length: MAX_LINE_LENGTH,
            extra_root_certificates: Vec::new(),
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Replaces all flags.
    #[must_use]
    pub const fn flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    /// Enables or disables the TLS upgrade.
    #[must_use]
    pub const fn encrypt(mut self, enabled: bool) -> Self {
        self.flags = self.flags.with(Flags::ENCRYPT, enabled);
        self
    }

    /// Enables or disables trust-all mode.
    #[must_use]
    pub const fn trust_all(mut self, enabled: bool) -> Self {
        self.flags = self.flags.with(Flags::TRUST_ALL, enabled);
        self
    }

    /// Sets the per-address connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the read idle timeout.
    #[must_use]
    pub const fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the reader and writer buffer capacities.
    #[must_use]
    pub const fn buffer_sizes(mut self, read: usize, write: usize) -> Self {
        self.read_buffer_size = read;
        self.write_buffer_size = write;
        self
    }

    /// Sets the longest line a read accepts.
    #[must_use]
    pub const fn max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max;
        self
    }

    /// Adds a trust anchor.
    #[must_use]
    pub fn root_certificate(mut self, certificate: CertificateDer<'static>) -> Self {
        self.extra_root_certificates.push(certificate);
        self
    }

    /// Builds the configuration.
    ///
    /// Without an explicit port, 993 is used for encrypted transports and
    /// 143 otherwise.
    #[must_use]
    pub fn build(self) -> Config {
        let default_port = if self.flags.contains(Flags::ENCRYPT) {
            993
        } else {
            143
        };
        Config {
            host: self.host,
            port: self.port.unwrap_or(default_port),
            flags: self.flags,
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            read_buffer_size: self.read_buffer_size,
            write_buffer_size: self.write_buffer_size,
            max_line_length: self.max_line_length,
            extra_root_certificates: self.extra_root_certificates,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let mut flags = Flags::ENCRYPT | Flags::TRUST_ALL;
        assert!(flags.contains(Flags::ENCRYPT));
        assert!(flags.contains(Flags::TRUST_ALL));
        assert_eq!(flags.bits(), 0x09);

        flags.remove(Flags::TRUST_ALL);
        assert!(!flags.contains(Flags::TRUST_ALL));
        assert!(Flags::NONE.is_empty());
        assert!(Flags::NONE.contains(Flags::NONE));
    }

    #[test]
    fn test_flags_from_bits_truncate() {
        assert_eq!(Flags::from_bits_truncate(0xff).bits(), 0x09);
        assert_eq!(Flags::from_bits_truncate(0x02), Flags::NONE);
    }

    #[test]
    fn test_config_new() {
        let config = Config::new("vvm.example.com", 143, Flags::NONE);
        assert_eq!(config.host, "vvm.example.com");
        assert_eq!(config.connect_timeout, Duration::from_millis(10_000));
        assert_eq!(config.read_timeout, Duration::from_millis(60_000));
        assert_eq!(config.read_buffer_size, 1024);
        assert_eq!(config.write_buffer_size, 512);
        assert_eq!(config.max_line_length, MAX_LINE_LENGTH);
        assert!(!config.encrypts());
        assert!(!config.trusts_all_certificates());
    }

    #[test]
    fn test_config_builder() {
        let config = Config::builder("imap.example.com")
            .encrypt(true)
            .trust_all(true)
            .connect_timeout(Duration::from_secs(2))
            .buffer_sizes(4096, 1024)
            .max_line_length(8192)
            .build();

        assert_eq!(config.port, 993);
        assert!(config.encrypts());
        assert!(config.trusts_all_certificates());
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.read_buffer_size, 4096);
        assert_eq!(config.max_line_length, 8192);

        let config = Config::builder("imap.example.com")
            .flags(Flags::ENCRYPT | Flags::TRUST_ALL)
            .trust_all(false)
            .port(10993)
            .build();
        assert_eq!(config.port, 10993);
        assert_eq!(config.flags, Flags::ENCRYPT);
    }

    #[test]
    fn test_config_builder_default_port() {
        let config = Config::builder("imap.example.com").build();
        assert_eq!(config.port, 143);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_config_serde() {
        let config = Config::new("imap.example.com", 993, Flags::ENCRYPT);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
