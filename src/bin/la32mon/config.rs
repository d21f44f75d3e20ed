use std::{fs, path::Path};

use color_eyre::eyre::{eyre, Result, WrapErr};
use la32_voices::{ControlRomFeatures, SoundBank};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub profile: String,
    pub release_ticks: u32,
    /// Replaces the placeholder bank when present.
    pub bank: Option<SoundBank>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            profile: "cm32l".to_string(),
            release_ticks: 2,
            bank: None,
        }
    }
}

impl MonitorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).wrap_err_with(|| format!("reading {}", path.display()))?;
        Self::parse(&contents).wrap_err_with(|| format!("parsing {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn features(&self) -> Result<ControlRomFeatures> {
        ControlRomFeatures::preset(&self.profile)
            .ok_or_else(|| eyre!("unknown profile {:?}", self.profile))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = MonitorConfig::parse("").unwrap();
        assert_eq!(config.profile, "cm32l");
        assert_eq!(config.release_ticks, 2);
        assert!(config.bank.is_none());
    }

    #[test]
    fn profile_selects_preset() {
        let config = MonitorConfig::parse("profile = \"mt32\"\nrelease_ticks = 5").unwrap();
        assert_eq!(config.features().unwrap(), ControlRomFeatures::mt32());
        assert_eq!(config.release_ticks, 5);

        let config = MonitorConfig::parse("profile = \"sc55\"").unwrap();
        assert!(config.features().is_err());
    }

    #[test]
    fn partial_bank_fills_in_defaults() {
        let config = MonitorConfig::parse(
            r#"
            [bank]
            rhythm = [{ timbre = 70 }]

            [[bank.timbres]]
            name = "Brass"
            partial_mute = 3
            "#,
        )
        .unwrap();
        let bank = config.bank.unwrap();
        assert_eq!(bank.timbres[0].name, "Brass");
        assert_eq!(bank.timbres[0].partial_mute, 3);
        assert_eq!(bank.rhythm[0].timbre, 70);
        assert_eq!(bank.rhythm[0].output_level, 100);
    }
}
