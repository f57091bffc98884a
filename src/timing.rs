//! Timing templates and scan speed control
//!
//! Maps the configured timing level onto the scanner's `-T<n>` flag

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingTemplate {
    level: u8,
}

impl TimingTemplate {
    pub fn from_level(level: u8) -> Self {
        Self { level: level.min(5) }
    }

    /// 0 paranoid, 1 sneaky, 2 polite, 3 normal, 4 aggressive, 5 insane
    pub fn name(&self) -> &'static str {
        match self.level {
            0 => "paranoid",
            1 => "sneaky",
            2 => "polite",
            3 => "normal",
            4 => "aggressive",
            _ => "insane",
        }
    }

    pub fn nmap_flag(&self) -> String {
        format!("-T{}", self.level)
    }
}
