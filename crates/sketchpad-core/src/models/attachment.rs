use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_ATTACHMENTS: usize = 10;

/// An image sent along with a prompt, either inline as a data URL or by address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
}

impl Attachment {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreflightError {
    #[error("at most {MAX_ATTACHMENTS} images can be attached, got {0}")]
    TooManyAttachments(usize),

    #[error("attachment {index} is not an image data URL or web address")]
    UnsupportedAttachment { index: usize },
}

/// Client-side checks that must pass before a conversation without an id is
/// created on the provider.
pub fn preflight(attachments: &[Attachment]) -> Result<(), PreflightError> {
    if attachments.len() > MAX_ATTACHMENTS {
        return Err(PreflightError::TooManyAttachments(attachments.len()));
    }

    for (index, attachment) in attachments.iter().enumerate() {
        let url = attachment.url.trim();
        let accepted = url.starts_with("data:image/")
            || url.starts_with("https://")
            || url.starts_with("http://");
        if !accepted {
            return Err(PreflightError::UnsupportedAttachment { index });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_data_and_web_urls() {
        let attachments = vec![
            Attachment::new("data:image/png;base64,AAAA"),
            Attachment::new("https://cdn.example/cat.jpg"),
        ];
        assert_eq!(preflight(&attachments), Ok(()));
        assert_eq!(preflight(&[]), Ok(()));
    }

    #[test]
    fn test_rejects_non_image_data() {
        let attachments = vec![
            Attachment::new("https://cdn.example/ok.png"),
            Attachment::new("data:text/plain;base64,AAAA"),
        ];
        assert_eq!(
            preflight(&attachments),
            Err(PreflightError::UnsupportedAttachment { index: 1 })
        );
    }

    #[test]
    fn test_rejects_too_many() {
        let attachments = vec![Attachment::new("https://a.example/x.png"); MAX_ATTACHMENTS + 1];
        assert_eq!(preflight(&attachments), Err(PreflightError::TooManyAttachments(11)));
    }
}
