//! Mailbox addresses as found in `From`, `To`, `Return-Path` and `Sender`.

/// A parsed email address.
///
/// - `"Ana Ruiz <ana@example.org>"` → `display_name = "Ana Ruiz"`, `address = "ana@example.org"`
/// - `"<bounce@lists.example.org>"` → `display_name = ""`, `address = "bounce@lists.example.org"`
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EmailAddress {
    /// Human-readable display name (may be empty).
    pub display_name: String,
    /// The bare email address (`user@domain`), or the raw value when no
    /// address could be recognised.
    pub address: String,
}

impl EmailAddress {
    /// Parse a single address from a decoded header value.
    ///
    /// The last `<…>` group wins, so `"a <x@y> <z@w>"` yields `z@w`. Without
    /// angle brackets the first whitespace-separated token containing `@` is
    /// taken; failing that the trimmed value is kept as-is.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::default();
        }

        if let Some(open) = trimmed.rfind('<') {
            if let Some(close) = trimmed[open..].find('>') {
                let address = trimmed[open + 1..open + close].trim().to_string();
                let display_name = strip_quotes(&trimmed[..open]);
                return Self {
                    display_name,
                    address,
                };
            }
        }

        let address = trimmed
            .split_whitespace()
            .find(|tok| tok.contains('@'))
            .unwrap_or(trimmed)
            .to_string();
        Self {
            display_name: String::new(),
            address,
        }
    }

    /// Parse a comma-separated list of addresses.
    ///
    /// Commas inside quotes or angle brackets do not split.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        let mut results = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut in_angle = false;

        for ch in raw.chars() {
            match ch {
                '"' => in_quotes = !in_quotes,
                '<' if !in_quotes => in_angle = true,
                '>' if !in_quotes => in_angle = false,
                ',' if !in_quotes && !in_angle => {
                    results.extend(Self::non_empty(&current));
                    current.clear();
                    continue;
                }
                _ => {}
            }
            current.push(ch);
        }
        results.extend(Self::non_empty(&current));
        results
    }

    fn non_empty(raw: &str) -> Option<Self> {
        let addr = Self::parse(raw);
        (!addr.address.is_empty()).then_some(addr)
    }

    /// `true` if the address looks like `local@domain`.
    pub fn is_valid(&self) -> bool {
        matches!(self.address.split_once('@'), Some((l, d)) if !l.is_empty() && !d.is_empty())
    }

    /// Lowercased domain part, if the address has one.
    pub fn domain(&self) -> Option<String> {
        let (_, domain) = self.address.rsplit_once('@')?;
        let domain = domain.trim().trim_end_matches('.').to_lowercase();
        (!domain.is_empty()).then_some(domain)
    }

    /// Lowercased bare address, the key used for sender counts and sorting.
    pub fn normalized(&self) -> String {
        self.address.trim().to_lowercase()
    }

    /// Format for display: `"Display Name <address>"` or just `"address"`.
    pub fn display(&self) -> String {
        if self.display_name.is_empty() {
            self.address.clone()
        } else {
            format!("{} <{}>", self.display_name, self.address)
        }
    }
}

/// Strip surrounding double-quotes and trim whitespace.
fn strip_quotes(s: &str) -> String {
    let trimmed = s.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_address() {
        let addr = EmailAddress::parse("ana@example.org");
        assert_eq!(addr.address, "ana@example.org");
        assert_eq!(addr.display_name, "");
    }

    #[test]
    fn test_parse_name_and_address() {
        let addr = EmailAddress::parse("Ana Ruiz <ana@Example.ORG>");
        assert_eq!(addr.address, "ana@Example.ORG");
        assert_eq!(addr.display_name, "Ana Ruiz");
        assert_eq!(addr.domain().as_deref(), Some("example.org"));
    }

    #[test]
    fn test_parse_quoted_name() {
        let addr = EmailAddress::parse("\"Ruiz, Ana\" <ana@example.org>");
        assert_eq!(addr.display_name, "Ruiz, Ana");
        assert_eq!(addr.address, "ana@example.org");
    }

    #[test]
    fn test_parse_return_path_with_trailing_text() {
        let addr = EmailAddress::parse("bounce@lists.example.org (mailing list)");
        assert_eq!(addr.address, "bounce@lists.example.org");
    }

    #[test]
    fn test_parse_without_at_sign() {
        let addr = EmailAddress::parse("undisclosed-recipients");
        assert_eq!(addr.address, "undisclosed-recipients");
        assert!(!addr.is_valid());
        assert_eq!(addr.domain(), None);
    }

    #[test]
    fn test_parse_list_with_quoted_comma() {
        let list = EmailAddress::parse_list("\"Ruiz, Ana\" <a@b.com>, other@c.com, ");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].display_name, "Ruiz, Ana");
        assert_eq!(list[1].address, "other@c.com");
    }

    #[test]
    fn test_display() {
        let addr = EmailAddress::parse("Ana <ana@example.org>");
        assert_eq!(addr.to_string(), "Ana <ana@example.org>");
        assert_eq!(EmailAddress::parse("x@y.z").display(), "x@y.z");
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(EmailAddress::parse("   "), EmailAddress::default());
    }
}
