//! Content gate applied to every inbound chat message.
//!
//! Moderation itself is a marketplace policy concern; the gateway only needs
//! a synchronous predicate. A rejected message is not an error: its content
//! is replaced by `POLICY_NOTICE` before broadcast, and the notice is never
//! written to the ledger.

/// Substituted for rejected content. The ledger write path compares against
/// this exact string, so it must never change without migrating that check.
pub const POLICY_NOTICE: &str = "Formal tone only, contact exchange is not permitted.";

pub trait ModerationGate: Send + Sync {
    fn approve(&self, text: &str) -> bool;
}

/// Default gate: flags attempts to move the conversation off-platform.
/// Marketplace rules forbid exchanging phone numbers, email addresses, or
/// messenger handles in chat before a sale.
pub struct ContactExchangeGate;

impl ModerationGate for ContactExchangeGate {
    fn approve(&self, text: &str) -> bool {
        !looks_like_phone_number(text) && !looks_like_email(text) && !names_a_messenger(text)
    }
}

/// Seven or more digits in a row, allowing the usual phone separators.
/// Prices ("1,500") stay under the threshold because ',' and '.' break runs.
fn looks_like_phone_number(text: &str) -> bool {
    let mut run = 0usize;
    for c in text.chars() {
        if c.is_ascii_digit() {
            run += 1;
            if run >= 7 {
                return true;
            }
        } else if !matches!(c, ' ' | '-' | '(' | ')') {
            run = 0;
        }
    }
    false
}

fn looks_like_email(text: &str) -> bool {
    text.split_whitespace().any(|word| {
        word.split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'))
    })
}

fn names_a_messenger(text: &str) -> bool {
    let lower = text.to_lowercase();
    ["whatsapp", "telegram", "viber"]
        .iter()
        .any(|name| lower.contains(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approve(text: &str) -> bool {
        ContactExchangeGate.approve(text)
    }

    #[test]
    fn ordinary_haggling_passes() {
        assert!(approve("Is the bike still available?"));
        assert!(approve("Would you take 1500 for it?"));
        assert!(approve("I can pick it up at 10:30 tomorrow"));
    }

    #[test]
    fn phone_numbers_are_rejected() {
        assert!(!approve("call me on 0812345678"));
        assert!(!approve("my number is 081-234-5678"));
        assert!(!approve("(081) 234 5678"));
    }

    #[test]
    fn separated_prices_are_not_phone_numbers() {
        assert!(approve("asking 1,250,000 but negotiable"));
    }

    #[test]
    fn email_addresses_are_rejected() {
        assert!(!approve("reach me at buyer@example.com instead"));
    }

    #[test]
    fn bare_at_sign_is_fine() {
        assert!(approve("meet @ the station entrance"));
    }

    #[test]
    fn messenger_handles_are_rejected() {
        assert!(!approve("add me on WhatsApp"));
        assert!(!approve("I'm on telegram"));
    }
}
