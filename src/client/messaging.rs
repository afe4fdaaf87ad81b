//! Application-level send/receive helpers on the client: private messages,
//! token transfers, payment requests and nametag bindings.

use crate::client::NostrClient;
use crate::envelopes::nametag::{self, PhoneNormalizer};
use crate::envelopes::payment_request::{
    self, PaymentRequest, PaymentRequestOptions, PaymentRequestPayload, PaymentRequestStatus,
    PaymentResponse,
};
use crate::envelopes::token_transfer::{self, TokenTransfer, TokenTransferOptions};
use crate::error::ClientError;
use crate::signer::gift_wrap::{self, PrivateMessage};
use crate::types::nostr::{Event, PublicKey, Template, TEXT_NOTE};

impl NostrClient {
    /// Publish a plain text note.
    pub async fn publish_text_note(&self, content: &str) -> Result<String, ClientError> {
        self.sign_and_publish(&Template::new(TEXT_NOTE, content, vec![]))
            .await
    }

    /// Gift-wrap `content` for `recipient_hex` and publish the wrap. The
    /// published event is signed by a one-off ephemeral identity.
    pub async fn send_private_message(
        &self,
        recipient_hex: &str,
        content: &str,
        reply_to_event_id: Option<&str>,
    ) -> Result<String, ClientError> {
        let recipient = PublicKey::from_hex(recipient_hex)?;
        let wrapped = gift_wrap::wrap_private_message(
            &self.inner.keys,
            &recipient,
            content,
            reply_to_event_id,
        )?;
        self.publish(wrapped).await
    }

    /// Gift-wrap a read receipt for `event_id` and publish it.
    pub async fn send_read_receipt(
        &self,
        recipient_hex: &str,
        event_id: &str,
    ) -> Result<String, ClientError> {
        let recipient = PublicKey::from_hex(recipient_hex)?;
        let wrapped = gift_wrap::wrap_read_receipt(&self.inner.keys, &recipient, event_id)?;
        self.publish(wrapped).await
    }

    /// Unwrap a received kind-1059 gift wrap addressed to this client.
    pub fn unwrap_private_message(&self, event: &Event) -> Result<PrivateMessage, ClientError> {
        Ok(gift_wrap::unwrap(&self.inner.keys, event)?)
    }

    /// Seal and publish a token transfer.
    pub async fn send_token_transfer(
        &self,
        recipient_hex: &str,
        token: &str,
        options: &TokenTransferOptions,
    ) -> Result<String, ClientError> {
        let recipient = PublicKey::from_hex(recipient_hex)?;
        let event = token_transfer::build(&self.inner.keys, &recipient, token, options)?;
        self.publish(event).await
    }

    /// Decrypt a received (or own) token-transfer event.
    pub fn parse_token_transfer(&self, event: &Event) -> Result<TokenTransfer, ClientError> {
        Ok(token_transfer::parse(&self.inner.keys, event)?)
    }

    /// Seal and publish a payment request. Returns the event id and the
    /// final payload (with generated request id and effective deadline).
    pub async fn send_payment_request(
        &self,
        target_hex: &str,
        amount: &str,
        coin_id: &str,
        recipient_nametag: &str,
        options: PaymentRequestOptions,
    ) -> Result<(String, PaymentRequestPayload), ClientError> {
        let target = PublicKey::from_hex(target_hex)?;
        let (event, payload) = payment_request::build_request(
            &self.inner.keys,
            &target,
            amount,
            coin_id,
            recipient_nametag,
            options,
        )?;
        let event_id = self.publish(event).await?;
        Ok((event_id, payload))
    }

    /// Decrypt a received (or own) payment-request event.
    pub fn parse_payment_request(&self, event: &Event) -> Result<PaymentRequest, ClientError> {
        Ok(payment_request::parse_request(&self.inner.keys, event)?)
    }

    /// Answer a payment request with DECLINED or EXPIRED.
    pub async fn respond_to_payment_request(
        &self,
        request: &PaymentRequest,
        status: PaymentRequestStatus,
        reason: Option<String>,
    ) -> Result<String, ClientError> {
        let event = payment_request::build_response(
            &self.inner.keys,
            &request.requester,
            &request.payload.request_id,
            &request.event_id,
            status,
            reason,
        )?;
        self.publish(event).await
    }

    /// Decrypt a received (or own) payment-request response.
    pub fn parse_payment_response(&self, event: &Event) -> Result<PaymentResponse, ClientError> {
        Ok(payment_request::parse_response(&self.inner.keys, event)?)
    }

    /// Publish (or replace) this identity's binding for `nametag`.
    pub async fn publish_nametag_binding(
        &self,
        nametag: &str,
        address: &str,
        verified: bool,
    ) -> Result<String, ClientError> {
        self.publish_nametag_binding_with(nametag, address, verified, None)
            .await
    }

    /// [`NostrClient::publish_nametag_binding`] with a phone normalizer for
    /// phone-shaped nametags.
    pub async fn publish_nametag_binding_with(
        &self,
        nametag: &str,
        address: &str,
        verified: bool,
        phone: Option<&dyn PhoneNormalizer>,
    ) -> Result<String, ClientError> {
        let normalized = nametag::normalize_nametag(nametag, phone);
        let hash = nametag::nametag_hash(&normalized);
        let template = nametag::binding_template(&hash, address, verified)?;
        self.sign_and_publish(&template).await
    }
}
