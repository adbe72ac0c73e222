use url::Url;

/// `https://wa.me/{digits}?text={message}`; `None` when the phone carries
/// no digits.
pub fn whatsapp_link(phone: &str, message: &str) -> Option<String> {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }

    let mut url = Url::parse("https://wa.me/").ok()?;
    url.set_path(&digits);
    url.query_pairs_mut().append_pair("text", message);
    Some(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_formatting_and_encodes_message() {
        let link = whatsapp_link("+57 (300) 123-4567", "Hola, su pedido").unwrap();
        assert_eq!(link, "https://wa.me/573001234567?text=Hola%2C+su+pedido");
    }

    #[test]
    fn phone_without_digits_has_no_link() {
        assert!(whatsapp_link("n/a", "hola").is_none());
    }
}
