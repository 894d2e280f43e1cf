//! E.164 normalization for the OIDC `phone_number` claim.

/// ISO 3166-1 alpha-2 region to ITU calling code
const CALLING_CODES: &[(&str, &str)] = &[
    ("US", "1"),
    ("CA", "1"),
    ("GB", "44"),
    ("IE", "353"),
    ("FR", "33"),
    ("DE", "49"),
    ("NL", "31"),
    ("BE", "32"),
    ("LU", "352"),
    ("CH", "41"),
    ("AT", "43"),
    ("IT", "39"),
    ("ES", "34"),
    ("PT", "351"),
    ("SE", "46"),
    ("NO", "47"),
    ("DK", "45"),
    ("FI", "358"),
    ("PL", "48"),
    ("CZ", "420"),
    ("GR", "30"),
    ("TR", "90"),
    ("RU", "7"),
    ("UA", "380"),
    ("IL", "972"),
    ("AE", "971"),
    ("SA", "966"),
    ("EG", "20"),
    ("ZA", "27"),
    ("NG", "234"),
    ("KE", "254"),
    ("IN", "91"),
    ("PK", "92"),
    ("BD", "880"),
    ("CN", "86"),
    ("HK", "852"),
    ("TW", "886"),
    ("JP", "81"),
    ("KR", "82"),
    ("SG", "65"),
    ("MY", "60"),
    ("TH", "66"),
    ("VN", "84"),
    ("PH", "63"),
    ("ID", "62"),
    ("AU", "61"),
    ("NZ", "64"),
    ("BR", "55"),
    ("AR", "54"),
    ("CL", "56"),
    ("CO", "57"),
    ("PE", "51"),
    ("MX", "52"),
];

pub fn calling_code(country_code: &str) -> Option<&'static str> {
    let country_code = country_code.trim().to_ascii_uppercase();
    CALLING_CODES
        .iter()
        .find(|(region, _)| *region == country_code)
        .map(|(_, code)| *code)
}

/// Normalize a phone number to E.164 (`+<country><subscriber>`).
///
/// Numbers already starting with `+` only have their separators removed. National
/// numbers need a known `country_code`; a single leading trunk `0` is dropped.
/// Returns `None` when the result is not 8 to 15 digits long.
pub fn to_e164(phone: &str, country_code: &str) -> Option<String> {
    let phone = phone.trim();
    if phone.is_empty() {
        return None;
    }

    let separators = |c: char| c == ' ' || c == '-' || c == '.' || c == '(' || c == ')';
    let digits_of = |s: &str| -> Option<String> {
        let cleaned: String = s.chars().filter(|c| !separators(*c)).collect();
        cleaned
            .chars()
            .all(|c| c.is_ascii_digit())
            .then_some(cleaned)
    };

    let digits = if let Some(international) = phone.strip_prefix('+') {
        digits_of(international)?
    } else {
        let code = calling_code(country_code)?;
        let national = digits_of(phone)?;
        let national = national.strip_prefix('0').unwrap_or(&national);
        format!("{}{}", code, national)
    };

    if !(8..=15).contains(&digits.len()) || digits.starts_with('0') {
        return None;
    }
    Some(format!("+{}", digits))
}
