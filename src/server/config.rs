//! Accessory configuration

use rand::Rng;

use crate::storage::DEFAULT_REGION_SIZE;

/// Setup code printed on the MICO demo accessories
pub const DEFAULT_SETUP_CODE: &str = "454-45-454";

/// Failed pair-setup attempts tolerated before refusing further tries
pub const DEFAULT_MAX_SETUP_ERRORS: u32 = 10;

/// How pair-setup learns the SRP verifier
#[derive(Clone, PartialEq, Eq)]
pub enum SetupCode {
    /// Plain setup code; a fresh salt and verifier are derived per attempt
    Password(String),
    /// Precomputed salt and verifier, the code itself never stored
    Verifier { salt: Vec<u8>, verifier: Vec<u8> },
}

impl std::fmt::Debug for SetupCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::Verifier { salt, .. } => f
                .debug_struct("Verifier")
                .field("salt_len", &salt.len())
                .finish_non_exhaustive(),
        }
    }
}

/// Configuration for a `HomeKit` accessory instance
#[derive(Debug, Clone)]
pub struct AccessoryConfig {
    /// Accessory name
    pub name: String,

    /// Accessory pairing identifier (MAC address format: AA:BB:CC:DD:EE:FF)
    pub device_id: String,

    /// HTTP listen port (0 = auto-assign)
    pub port: u16,

    /// Source of the SRP verifier
    pub setup_code: SetupCode,

    /// Pair-setup failures before answering `MaxTries`
    pub max_setup_errors: u32,

    /// Size of the pairing list flash region in bytes
    pub pairing_region_size: usize,
}

impl Default for AccessoryConfig {
    fn default() -> Self {
        Self {
            name: "MICO Accessory".to_string(),
            device_id: Self::generate_device_id(),
            port: 8080,
            setup_code: SetupCode::Password(DEFAULT_SETUP_CODE.to_string()),
            max_setup_errors: DEFAULT_MAX_SETUP_ERRORS,
            pairing_region_size: DEFAULT_REGION_SIZE,
        }
    }
}

impl AccessoryConfig {
    /// Create a new configuration with the given accessory name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the pairing identifier
    #[must_use]
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    /// Set custom server port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Use a plain setup code
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.setup_code = SetupCode::Password(password.into());
        self
    }

    /// Use a precomputed SRP salt and verifier
    #[must_use]
    pub fn with_verifier(mut self, salt: Vec<u8>, verifier: Vec<u8>) -> Self {
        self.setup_code = SetupCode::Verifier { salt, verifier };
        self
    }

    /// Set the pair-setup failure limit
    #[must_use]
    pub fn with_max_setup_errors(mut self, max: u32) -> Self {
        self.max_setup_errors = max;
        self
    }

    /// Set the pairing region size (capacity is `size / 100` controllers)
    #[must_use]
    pub fn with_pairing_region_size(mut self, size: usize) -> Self {
        self.pairing_region_size = size;
        self
    }

    /// Generate a random device ID in MAC address format
    fn generate_device_id() -> String {
        let mut rng = rand::thread_rng();
        let bytes: [u8; 6] = rng.r#gen();
        format!(
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]
        )
    }
}
