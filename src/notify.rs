use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{CallError, SendError};
use crate::location::GeoFix;

/// Text sent to every emergency contact.
pub fn sos_message(fix: &GeoFix) -> String {
    format!(
        "Emergency! I may have been in an accident. My last known location is: {}",
        fix.maps_link()
    )
}

/// Outbound SMS and voice calls. Each call is one independent attempt.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send_sms(&self, number: &str, message: &str) -> Result<(), SendError>;

    async fn place_call(&self, number: &str) -> Result<(), CallError>;
}

/// Writes notifications to the log instead of sending them.
pub struct LogTransport;

#[async_trait]
impl NotificationTransport for LogTransport {
    async fn send_sms(&self, number: &str, message: &str) -> Result<(), SendError> {
        log::info!("[SMS] -> {}: {}", number, message);
        Ok(())
    }

    async fn place_call(&self, number: &str) -> Result<(), CallError> {
        log::info!("[CALL] -> {}", number);
        Ok(())
    }
}

/// Sends through Termux:API (`termux-sms-send`, `termux-telephony-call`).
pub struct TermuxTransport;

async fn run_termux(program: &str, args: &[&str]) -> Result<(), String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| format!("{}: {}", program, e))?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(format!("{} exited with {}: {}", program, output.status, stderr.trim()))
    }
}

#[async_trait]
impl NotificationTransport for TermuxTransport {
    async fn send_sms(&self, number: &str, message: &str) -> Result<(), SendError> {
        run_termux("termux-sms-send", &["-n", number, message])
            .await
            .map_err(|reason| SendError {
                number: number.to_string(),
                reason,
            })
    }

    async fn place_call(&self, number: &str) -> Result<(), CallError> {
        run_termux("termux-telephony-call", &[number])
            .await
            .map_err(|reason| CallError {
                number: number.to_string(),
                reason,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sos_message_template() {
        let message = sos_message(&GeoFix::new(1.0, 2.0));
        assert_eq!(
            message,
            "Emergency! I may have been in an accident. My last known location is: \
             http://maps.google.com/maps?q=1.0,2.0"
        );
    }

    #[tokio::test]
    async fn test_log_transport_always_succeeds() {
        let transport = LogTransport;
        assert!(transport.send_sms("15551234567", "hi").await.is_ok());
        assert!(transport.place_call("15551234567").await.is_ok());
    }
}
