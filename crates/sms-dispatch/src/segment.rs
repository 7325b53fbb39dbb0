//! Message segmentation
//!
//! Splits a body that does not fit one transmission unit into parts that
//! the carrier reassembles into one logical message. Multipart messages lose
//! room in every part to the concatenation header: 7 septets for GSM-7 text,
//! 3 UCS-2 characters otherwise.

/// GSM 03.38 basic character set
const GSM7_BASIC: &str = "@£$¥èéùìòÇ\nØø\rÅåΔ_ΦΓΛΩΠΨΣΘΞÆæßÉ !\"#¤%&'()*+,-./0123456789:;<=>?\
¡ABCDEFGHIJKLMNOPQRSTUVWXYZÄÖÑÜ§¿abcdefghijklmnopqrstuvwxyzäöñüà";

/// GSM 03.38 extension table, two septets each (escape + char)
const GSM7_EXTENSION: &str = "^{}\\[~]|€\u{0C}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Gsm7,
    Ucs2,
}

pub fn detect_encoding(body: &str) -> Encoding {
    if body.chars().all(|c| GSM7_BASIC.contains(c) || GSM7_EXTENSION.contains(c)) {
        Encoding::Gsm7
    } else {
        Encoding::Ucs2
    }
}

fn units(c: char, encoding: Encoding) -> usize {
    match encoding {
        Encoding::Gsm7 if GSM7_EXTENSION.contains(c) => 2,
        Encoding::Gsm7 => 1,
        Encoding::Ucs2 => c.len_utf16(),
    }
}

/// Split `body` into transmission segments.
///
/// `limit` is the GSM-7 capacity of a single-part message (160 on most
/// carriers). Returns exactly one segment when the body fits.
pub fn segment_message(body: &str, limit: usize) -> Vec<String> {
    let encoding = detect_encoding(body);
    let (single_limit, part_limit) = match encoding {
        Encoding::Gsm7 => (limit, limit.saturating_sub(7)),
        Encoding::Ucs2 => {
            let single = (limit * 7 / 16).max(1);
            (single, single.saturating_sub(3))
        }
    };
    // Room for at least one surrogate pair or extension character
    let part_limit = part_limit.max(2);

    let total: usize = body.chars().map(|c| units(c, encoding)).sum();
    if total <= single_limit {
        return vec![body.to_string()];
    }

    let mut segments = Vec::new();
    let mut current = String::new();
    let mut used = 0;
    for c in body.chars() {
        let cost = units(c, encoding);
        if used + cost > part_limit {
            segments.push(std::mem::take(&mut current));
            used = 0;
        }
        current.push(c);
        used += cost;
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}
