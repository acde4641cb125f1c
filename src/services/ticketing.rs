//! Admission passes for confirmed tickets.
//!
//! A pass is the text a QR code encodes at the door. Rendering the image is
//! left to the client; the payload is signed so the scanner can check it
//! offline.

use crate::payments::utils::{hmac_sha512_hex, secure_eq};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const PASS_VERSION: &str = "TKT1";
const SIGNATURE_HEX_LEN: usize = 32;

/// Ticket that just became valid for entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TicketAdmission {
    pub ticket_id: Uuid,
    pub event_id: Option<Uuid>,
    pub transaction_id: Uuid,
    pub holder_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IssuedPass {
    pub qr_payload: String,
}

/// Produces the admission pass sent with the ticket receipt
#[async_trait]
pub trait TicketIssuer: Send + Sync {
    async fn issue(&self, admission: &TicketAdmission) -> anyhow::Result<IssuedPass>;
}

/// Issues `TKT1.<ticket>.<transaction>.<quantity>.<signature>` passes.
pub struct SignedTicketIssuer {
    secret: String,
}

impl SignedTicketIssuer {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn sign(&self, body: &str) -> String {
        let mut signature = hmac_sha512_hex(body.as_bytes(), &self.secret);
        signature.truncate(SIGNATURE_HEX_LEN);
        signature
    }

    /// Check a scanned payload and return the ticket it admits.
    pub fn verify(&self, payload: &str) -> Option<Uuid> {
        let (body, signature) = payload.rsplit_once('.')?;
        if !secure_eq(self.sign(body).as_bytes(), signature.as_bytes()) {
            return None;
        }
        let mut parts = body.split('.');
        if parts.next()? != PASS_VERSION {
            return None;
        }
        Uuid::parse_str(parts.next()?).ok()
    }
}

#[async_trait]
impl TicketIssuer for SignedTicketIssuer {
    async fn issue(&self, admission: &TicketAdmission) -> anyhow::Result<IssuedPass> {
        if admission.quantity <= 0 {
            anyhow::bail!("ticket {} has no admissions", admission.ticket_id);
        }
        let body = format!(
            "{}.{}.{}.{}",
            PASS_VERSION,
            admission.ticket_id.simple(),
            admission.transaction_id.simple(),
            admission.quantity
        );
        let signature = self.sign(&body);
        Ok(IssuedPass {
            qr_payload: format!("{}.{}", body, signature),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admission(quantity: i32) -> TicketAdmission {
        TicketAdmission {
            ticket_id: Uuid::new_v4(),
            event_id: Some(Uuid::new_v4()),
            transaction_id: Uuid::new_v4(),
            holder_id: Uuid::new_v4(),
            quantity,
        }
    }

    #[tokio::test]
    async fn issued_pass_verifies_to_its_ticket() {
        let issuer = SignedTicketIssuer::new("door-secret");
        let admission = admission(2);
        let pass = issuer.issue(&admission).await.unwrap();

        assert!(pass.qr_payload.starts_with("TKT1."));
        assert_eq!(issuer.verify(&pass.qr_payload), Some(admission.ticket_id));
    }

    #[tokio::test]
    async fn tampered_or_foreign_pass_is_refused() {
        let issuer = SignedTicketIssuer::new("door-secret");
        let pass = issuer.issue(&admission(1)).await.unwrap();

        let tampered = pass.qr_payload.replacen(".1.", ".9.", 1);
        assert_eq!(issuer.verify(&tampered), None);
        assert_eq!(SignedTicketIssuer::new("other").verify(&pass.qr_payload), None);
        assert_eq!(issuer.verify("not-a-pass"), None);
    }

    #[tokio::test]
    async fn empty_admission_is_an_error() {
        let issuer = SignedTicketIssuer::new("door-secret");
        assert!(issuer.issue(&admission(0)).await.is_err());
    }
}
