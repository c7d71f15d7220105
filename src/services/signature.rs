//! Проверка подписи платёжного колбэка.
//!
//! Шлюз подписывает `orderId|paymentId` общим секретом через HMAC-SHA256 и
//! передаёт подпись в hex. Сравнение выполняется за постоянное время.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub struct PaymentVerifier;

impl PaymentVerifier {
    /// Ожидаемая подпись для пары заказ/платёж.
    pub fn sign(secret: &str, order_id: &str, payment_id: &str) -> String {
        // HMAC принимает ключ любой длины
        let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return String::new(),
        };
        mac.update(order_id.as_bytes());
        mac.update(b"|");
        mac.update(payment_id.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn verify(secret: &str, order_id: &str, payment_id: &str, signature: &str) -> bool {
        let Ok(supplied) = hex::decode(signature.trim()) else {
            return false;
        };
        let Ok(expected) = hex::decode(Self::sign(secret, order_id, payment_id)) else {
            return false;
        };
        if expected.is_empty() || supplied.len() != expected.len() {
            return false;
        }
        expected.ct_eq(supplied.as_slice()).into()
    }
}
