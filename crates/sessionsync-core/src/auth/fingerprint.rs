//! Coarse device fingerprint.
//!
//! A stable, non-cryptographic identifier derived from client environment
//! attributes. Collisions are acceptable: it is an informational signal
//! stored alongside the profile, never a security boundary.

use serde::{Deserialize, Serialize};

/// Separator between attributes in the fingerprint source string
const FIELD_SEPARATOR: &str = "|";

/// Color depth reported when the terminal advertises 24-bit color
const TRUECOLOR_DEPTH: u32 = 24;

/// Color depth reported otherwise
const DEFAULT_COLOR_DEPTH: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEnvironment {
    pub user_agent: String,
    pub platform: String,
    pub language: String,
    pub timezone: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub color_depth: u32,
}

impl DeviceEnvironment {
    /// Describe the current process environment
    pub fn detect() -> Self {
        let language = std::env::var("LANG")
            .ok()
            .and_then(|lang| normalize_locale(&lang))
            .unwrap_or_else(|| "en-US".to_string());

        let timezone = std::env::var("TZ")
            .ok()
            .filter(|tz| !tz.is_empty())
            .unwrap_or_else(|| "UTC".to_string());

        let dimension = |name: &str| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.trim().parse::<u32>().ok())
                .unwrap_or(0)
        };

        let color_depth = match std::env::var("COLORTERM").as_deref() {
            Ok("truecolor") | Ok("24bit") => TRUECOLOR_DEPTH,
            _ => DEFAULT_COLOR_DEPTH,
        };

        Self {
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            platform: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            language,
            timezone,
            screen_width: dimension("COLUMNS"),
            screen_height: dimension("LINES"),
            color_depth,
        }
    }

    /// Fingerprint of this environment
    pub fn fingerprint(&self) -> String {
        let resolution = format!("{}x{}", self.screen_width, self.screen_height);
        let color_depth = self.color_depth.to_string();
        let source = [
            self.user_agent.as_str(),
            self.platform.as_str(),
            self.language.as_str(),
            self.timezone.as_str(),
            resolution.as_str(),
            color_depth.as_str(),
        ]
        .join(FIELD_SEPARATOR);

        rolling_hash(&source)
    }
}

/// Fingerprint of the current process environment
pub fn generate() -> String {
    DeviceEnvironment::detect().fingerprint()
}

/// `hash = hash * 31 + unit` over UTF-16 code units with 32-bit signed
/// wraparound, rendered as the lower-hex absolute value.
pub fn rolling_hash(source: &str) -> String {
    let hash = source
        .encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)));

    // Widen first: |i32::MIN| does not fit in i32
    format!("{:x}", i64::from(hash).abs())
}

/// "pt_BR.UTF-8" -> "pt-BR"
fn normalize_locale(raw: &str) -> Option<String> {
    let base = raw.split(['.', '@']).next()?.trim();
    if base.is_empty() || base == "C" || base == "POSIX" {
        return None;
    }
    Some(base.replace('_', "-"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn browser_like() -> DeviceEnvironment {
        DeviceEnvironment {
            user_agent: "Mozilla/5.0".to_string(),
            platform: "Linux x86_64".to_string(),
            language: "en-US".to_string(),
            timezone: "America/Sao_Paulo".to_string(),
            screen_width: 1920,
            screen_height: 1080,
            color_depth: 24,
        }
    }

    #[test]
    fn test_rolling_hash_known_values() {
        assert_eq!(rolling_hash(""), "0");
        assert_eq!(rolling_hash("a"), "61");
        assert_eq!(rolling_hash("ab"), "c21");
        assert_eq!(rolling_hash("hello"), "5e918d2");
    }

    #[test]
    fn test_rolling_hash_wraps_to_min_value() {
        // Sums to exactly i32::MIN after wrapping
        assert_eq!(rolling_hash("polygenelubricants"), "80000000");
    }

    #[test]
    fn test_rolling_hash_uses_utf16_units() {
        assert_eq!(rolling_hash("é"), "e9");
        // Surrogate pair hashes as two units
        assert_eq!(rolling_hash("😀"), "1b0d63");
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let env = browser_like();
        assert_eq!(env.fingerprint(), "13748058");
        assert_eq!(env.fingerprint(), browser_like().fingerprint());

        let mut other = browser_like();
        other.timezone = "UTC".to_string();
        assert_ne!(env.fingerprint(), other.fingerprint());
    }

    #[test]
    fn test_normalize_locale() {
        assert_eq!(normalize_locale("pt_BR.UTF-8").as_deref(), Some("pt-BR"));
        assert_eq!(normalize_locale("en_US").as_deref(), Some("en-US"));
        assert_eq!(normalize_locale("C"), None);
        assert_eq!(normalize_locale(""), None);
    }

    #[test]
    fn test_detect_fills_every_field() {
        let env = DeviceEnvironment::detect();
        assert!(env.user_agent.starts_with("sessionsync-core/"));
        assert!(!env.platform.is_empty());
        assert!(!env.language.is_empty());
        assert_eq!(generate(), env.fingerprint());
    }
}
