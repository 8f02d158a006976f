//! Test helper utilities

use kagami_core::InboundDelivery;

/// Build a render request delivery the way a producer would publish it
pub fn render_request(delivery_tag: u64, link: &str, correlation_id: &str) -> InboundDelivery {
    InboundDelivery::new(delivery_tag, link)
        .with_correlation_id(correlation_id)
        .with_reply_to("client_q")
}

/// Fake PNG payload with a valid signature
pub fn fake_png() -> Vec<u8> {
    vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0, 0, 0]
}
