pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.chars()
        .map(std::primitive::char::to_lowercase)
        .flatten()
        .eq(b.chars().map(std::primitive::char::to_lowercase).flatten())
}

/// Jenkins one-at-a-time hash over the lowercased bytes of `s`. This is the hash the VM
/// uses for script names, hash-string literals and opcode mnemonic lookup.
pub fn lowercase_hash(s: impl AsRef<[u8]>) -> u32 {
    let mut h = 0u32;
    for &b in s.as_ref() {
        h = h.wrapping_add(u32::from(b.to_ascii_lowercase()));
        h = h.wrapping_add(h << 10);
        h ^= h >> 6;
    }
    h = h.wrapping_add(h << 3);
    h ^= h >> 11;
    h.wrapping_add(h << 15)
}

fn escape_char(out: &mut String, c: char) {
    match c {
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        '\0' => out.push_str("\\0"),
        '\\' => out.push_str("\\\\"),
        '"' => out.push_str("\\\""),
        c if c.is_ascii_control() => out.push_str(&format!("\\x{:02X}", c as u32)),
        c => out.push(c),
    }
}

/// The body of a string literal reading back as `bytes`. Bytes which are not valid UTF-8 are
/// written as `\xNN`.
pub fn escape(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    let mut rest = bytes;
    while !rest.is_empty() {
        let (valid, invalid) = match std::str::from_utf8(rest) {
            Ok(text) => (text, 0),
            Err(err) => {
                let valid = std::str::from_utf8(&rest[..err.valid_up_to()]).unwrap_or_default();
                (valid, err.error_len().unwrap_or(rest.len() - err.valid_up_to()))
            }
        };
        valid.chars().for_each(|c| escape_char(&mut out, c));
        let skipped = valid.len();
        for b in &rest[skipped..skipped + invalid] {
            out.push_str(&format!("\\x{:02X}", b));
        }
        rest = &rest[skipped + invalid..];
    }
    out
}
