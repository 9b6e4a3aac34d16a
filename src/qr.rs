//! Terminal rendering of pairing QR codes.

use chrono::{DateTime, Utc};
use qrcode::{render::unicode, QrCode};
use thiserror::Error;

use crate::store::QrCodeRecord;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QrError {
    #[error("QR generation failed: {0}")]
    GenerationFailed(String),
    #[error("QR code expired at {0}")]
    Expired(DateTime<Utc>),
}

/// Render QR code as ASCII for terminal display.
pub fn render_qr_ascii(data: &str) -> Result<String, QrError> {
    let code =
        QrCode::new(data.as_bytes()).map_err(|e| QrError::GenerationFailed(e.to_string()))?;

    // Inverted so the code reads on dark terminals.
    let image = code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build();

    Ok(image)
}

/// Render a stored code, refusing ones that can no longer be scanned.
pub fn render_record(record: &QrCodeRecord, now: DateTime<Utc>) -> Result<String, QrError> {
    if record.is_expired(now) {
        return Err(QrError::Expired(record.expires_at));
    }
    render_qr_ascii(&record.code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qr_ascii_render() {
        let result = render_qr_ascii("2@AbCdEf,noise,identity,adv");
        assert!(result.is_ok());
        assert!(result.unwrap().lines().count() > 10);
    }

    #[test]
    fn test_expired_record_is_not_rendered() {
        let now = Utc::now();
        let record = QrCodeRecord::new("ABC", now, chrono::Duration::seconds(60));
        assert!(render_record(&record, now).is_ok());

        let later = now + chrono::Duration::seconds(61);
        assert_eq!(
            render_record(&record, later),
            Err(QrError::Expired(record.expires_at))
        );
    }
}
