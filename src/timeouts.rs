pub mod ms {
    pub const COMMAND_DEFAULT: u64 = 12_000;
    pub const COMMAND_MIN: u64 = 1_000;
    pub const COMMAND_MAX: u64 = 30_000;

    pub const DELAY_DEFAULT: u64 = 250;
    pub const DELAY_MAX: u64 = 20_000;

    pub const WAIT_FOR_ELEMENT_DEFAULT: u64 = 5_000;
    pub const WAIT_FOR_ELEMENT_MIN: u64 = 250;
    pub const WAIT_FOR_ELEMENT_MAX: u64 = 20_000;

    pub const POLL_INTERVAL: u64 = 200;
    pub const DAEMON_POLL: u64 = 100;
}

pub mod secs {
    pub const DAEMON_STARTUP: u64 = 2;
    pub const REQUEST: u64 = 120;
    pub const DISCOVERY: u64 = 5;
}

/// Clamps a caller-supplied command deadline, falling back to `default` when absent.
pub fn clamp_command_timeout(value: Option<u64>, default: u64) -> u64 {
    value
        .unwrap_or(default)
        .clamp(ms::COMMAND_MIN, ms::COMMAND_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_command_timeout() {
        assert_eq!(clamp_command_timeout(None, ms::COMMAND_DEFAULT), 12_000);
        assert_eq!(clamp_command_timeout(Some(10), ms::COMMAND_DEFAULT), 1_000);
        assert_eq!(clamp_command_timeout(Some(90_000), ms::COMMAND_DEFAULT), 30_000);
        assert_eq!(clamp_command_timeout(Some(4_500), ms::COMMAND_DEFAULT), 4_500);
    }
}
