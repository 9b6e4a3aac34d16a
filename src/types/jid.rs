//! WhatsApp JID (Jabber ID) parsing and chat-id canonicalization.
//!
//! Transport events carry participants in several shapes: bare or formatted
//! phone numbers, `user@s.whatsapp.net`, device-qualified
//! `user:2@s.whatsapp.net`, or the legacy `user@c.us`. Everything stored
//! locally is keyed by the canonical `user@c.us` form returned by
//! [`normalize_chat_id`].

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Known JID servers.
pub mod servers {
    pub const DEFAULT_USER: &str = "s.whatsapp.net";
    pub const LEGACY_USER: &str = "c.us";
    pub const GROUP: &str = "g.us";
    pub const BROADCAST: &str = "broadcast";
    pub const HIDDEN_USER: &str = "lid";
    pub const NEWSLETTER: &str = "newsletter";
}

/// JID identifies a user, group or broadcast list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct JID {
    pub user: String,
    pub device: u16,
    pub server: String,
}

impl JID {
    /// Creates a new regular JID.
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server: server.into(),
            ..Default::default()
        }
    }

    /// Returns a version of the JID without the device part.
    pub fn to_non_ad(&self) -> Self {
        Self::new(self.user.clone(), self.server.clone())
    }

    pub fn is_group(&self) -> bool {
        self.server == servers::GROUP
    }

    /// Broadcast lists and the `status@broadcast` pseudo chat.
    pub fn is_broadcast(&self) -> bool {
        self.server == servers::BROADCAST
    }

    /// Whether this JID addresses a single person (a one-to-one chat).
    pub fn is_user(&self) -> bool {
        !self.user.is_empty()
            && matches!(
                self.server.as_str(),
                servers::DEFAULT_USER | servers::LEGACY_USER | servers::HIDDEN_USER
            )
    }

    /// Canonical chat identifier: device stripped, `s.whatsapp.net` folded
    /// into `c.us`.
    pub fn to_chat_id(&self) -> String {
        let server = match self.server.as_str() {
            servers::DEFAULT_USER => servers::LEGACY_USER,
            other => other,
        };
        format!("{}@{}", self.user, server)
    }
}

impl fmt::Display for JID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.device > 0 {
            write!(f, "{}:{}@{}", self.user, self.device, self.server)
        } else if !self.user.is_empty() {
            write!(f, "{}@{}", self.user, self.server)
        } else {
            write!(f, "{}", self.server)
        }
    }
}

/// Error type for JID parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to parse JID: {0}")]
pub struct ParseJIDError(pub String);

impl FromStr for JID {
    type Err = ParseJIDError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseJIDError("empty identifier".to_string()));
        }

        let Some((user_str, server)) = s.split_once('@') else {
            // Bare phone number, possibly formatted ("+55 11 99999-9991").
            let digits: String = s.chars().filter(char::is_ascii_digit).collect();
            if digits.is_empty() {
                return Err(ParseJIDError(format!("no digits in `{s}`")));
            }
            return Ok(JID::new(digits, servers::LEGACY_USER));
        };

        if server.is_empty() || server.contains('@') {
            return Err(ParseJIDError(format!("invalid server in `{s}`")));
        }

        let mut jid = JID::new(user_str, server);

        // AD JID format (user.agent:device@server); the agent is dropped.
        let (user, ad) = match user_str.split_once('.') {
            Some((user, ad)) => (user, Some(ad)),
            None => (user_str, None),
        };
        let device_part = match ad {
            Some(ad) => ad.split_once(':').map(|(_, device)| device),
            None => user.split_once(':').map(|(_, device)| device),
        };
        jid.user = user.split(':').next().unwrap_or_default().to_string();

        if let Some(device) = device_part {
            jid.device = device
                .parse()
                .map_err(|_| ParseJIDError(format!("failed to parse device from `{s}`")))?;
        }

        Ok(jid)
    }
}

/// Parse any supported participant shape into the canonical chat id.
pub fn normalize_chat_id(raw: &str) -> Result<String, ParseJIDError> {
    let jid: JID = raw.parse()?;
    Ok(jid.to_non_ad().to_chat_id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_jid() {
        let jid: JID = "1234567890@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.user, "1234567890");
        assert_eq!(jid.server, servers::DEFAULT_USER);
        assert_eq!(jid.device, 0);
    }

    #[test]
    fn test_parse_device_jid() {
        let jid: JID = "1234567890:2@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.user, "1234567890");
        assert_eq!(jid.device, 2);
        assert_eq!(jid.to_string(), "1234567890:2@s.whatsapp.net");
    }

    #[test]
    fn test_parse_ad_jid() {
        let jid: JID = "1234567890.0:1@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.user, "1234567890");
        assert_eq!(jid.device, 1);
    }

    #[test]
    fn test_normalize_variants_converge() {
        let expected = "5511999999991@c.us";
        for raw in [
            "5511999999991",
            "+55 11 99999-9991",
            "5511999999991@c.us",
            "5511999999991@s.whatsapp.net",
            "5511999999991:3@s.whatsapp.net",
        ] {
            assert_eq!(normalize_chat_id(raw).unwrap(), expected, "input {raw}");
        }
    }

    #[test]
    fn test_group_and_broadcast_detection() {
        let group: JID = "123456789-1234567890@g.us".parse().unwrap();
        assert!(group.is_group());
        assert!(!group.is_user());

        let status: JID = "status@broadcast".parse().unwrap();
        assert!(status.is_broadcast());
        assert!(!status.is_user());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(normalize_chat_id("").is_err());
        assert!(normalize_chat_id("no-digits-here").is_err());
        assert!(normalize_chat_id("123@").is_err());
    }
}
