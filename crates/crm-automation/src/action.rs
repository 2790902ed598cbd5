//! Action types
//!
//! Actions are what a rule does to its eligible customers, executed in list
//! order by the dispatcher.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::rule::{RuleError, RuleResult};

/// Longest SMS body accepted without a warning
pub const SMS_MAX_LENGTH: usize = 1600;

/// Characters per SMS segment
pub const SMS_SEGMENT_LENGTH: usize = 160;

/// Longest WhatsApp body accepted without a warning
pub const WHATSAPP_MAX_LENGTH: usize = 4096;

/// Action definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum Action {
    /// Send an email
    SendEmail {
        #[serde(default)]
        subject: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        html_content: Option<String>,
        /// Provider-side template; recipients get template data instead of
        /// rendered HTML
        #[serde(default, skip_serializing_if = "Option::is_none")]
        template_id: Option<String>,
    },

    /// Send an SMS
    SendSms {
        #[serde(default)]
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
    },

    /// Send a WhatsApp message
    #[serde(rename = "send_whatsapp")]
    SendWhatsApp {
        #[serde(default)]
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_url: Option<String>,
    },

    /// Tag every eligible customer
    AddTag {
        #[serde(default)]
        tag: String,
    },

    /// Move every eligible customer into a segment
    UpdateSegment {
        #[serde(default)]
        segment: String,
    },
}

/// Discriminant of an [`Action`], used to key handler lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SendEmail,
    SendSms,
    #[serde(rename = "send_whatsapp")]
    SendWhatsApp,
    AddTag,
    UpdateSegment,
}

impl ActionKind {
    /// Every action kind
    pub const ALL: [ActionKind; 5] = [
        ActionKind::SendEmail,
        ActionKind::SendSms,
        ActionKind::SendWhatsApp,
        ActionKind::AddTag,
        ActionKind::UpdateSegment,
    ];

    /// Action type name as stored
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendEmail => "send_email",
            Self::SendSms => "send_sms",
            Self::SendWhatsApp => "send_whatsapp",
            Self::AddTag => "add_tag",
            Self::UpdateSegment => "update_segment",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Action {
    /// Kind of this action
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::SendEmail { .. } => ActionKind::SendEmail,
            Self::SendSms { .. } => ActionKind::SendSms,
            Self::SendWhatsApp { .. } => ActionKind::SendWhatsApp,
            Self::AddTag { .. } => ActionKind::AddTag,
            Self::UpdateSegment { .. } => ActionKind::UpdateSegment,
        }
    }

    /// Create an email action with inline HTML
    pub fn email(subject: impl Into<String>, html_content: impl Into<String>) -> Self {
        Self::SendEmail {
            subject: subject.into(),
            html_content: Some(html_content.into()),
            template_id: None,
        }
    }

    /// Create an SMS action
    pub fn sms(message: impl Into<String>) -> Self {
        Self::SendSms {
            message: message.into(),
            from: None,
        }
    }

    /// Create a WhatsApp action
    pub fn whatsapp(message: impl Into<String>) -> Self {
        Self::SendWhatsApp {
            message: message.into(),
            media_url: None,
        }
    }

    /// Create a tagging action
    pub fn add_tag(tag: impl Into<String>) -> Self {
        Self::AddTag { tag: tag.into() }
    }

    /// Create a segment action
    pub fn update_segment(segment: impl Into<String>) -> Self {
        Self::UpdateSegment {
            segment: segment.into(),
        }
    }

    /// Check required fields are present
    ///
    /// Overlong message bodies are accepted with a warning.
    pub fn validate(&self) -> RuleResult<()> {
        let missing = |field: &str| {
            Err(RuleError::Validation(format!(
                "{} action requires {}",
                self.kind(),
                field
            )))
        };

        match self {
            Self::SendEmail {
                subject,
                html_content,
                template_id,
            } => {
                if subject.trim().is_empty() {
                    return missing("subject");
                }
                let has_html = html_content.as_deref().is_some_and(|h| !h.trim().is_empty());
                let has_template = template_id.as_deref().is_some_and(|t| !t.trim().is_empty());
                if !has_html && !has_template {
                    return missing("html_content or template_id");
                }
            }
            Self::SendSms { message, .. } => {
                if message.trim().is_empty() {
                    return missing("message");
                }
                let length = message.chars().count();
                if length > SMS_MAX_LENGTH {
                    warn!(
                        length,
                        segments = sms_segments(message),
                        "SMS message exceeds {} characters",
                        SMS_MAX_LENGTH
                    );
                }
            }
            Self::SendWhatsApp { message, .. } => {
                if message.trim().is_empty() {
                    return missing("message");
                }
                let length = message.chars().count();
                if length > WHATSAPP_MAX_LENGTH {
                    warn!(
                        length,
                        "WhatsApp message exceeds {} characters", WHATSAPP_MAX_LENGTH
                    );
                }
            }
            Self::AddTag { tag } => {
                if tag.trim().is_empty() {
                    return missing("tag");
                }
            }
            Self::UpdateSegment { segment } => {
                if segment.trim().is_empty() {
                    return missing("segment");
                }
            }
        }
        Ok(())
    }
}

/// Number of SMS segments a message needs
pub fn sms_segments(message: &str) -> usize {
    message.chars().count().div_ceil(SMS_SEGMENT_LENGTH)
}
