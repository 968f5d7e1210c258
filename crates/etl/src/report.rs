//! Plain-text report of decrypted contact-form rows.

use std::fmt::Write as _;

use common::protocol::ContactRecord;

/// Render `records` in the report layout.
///
/// Booleans print as `True`/`False` and an absent or empty middle name as
/// `-`, so the output matches reports produced by earlier tooling.
pub fn render(records: &[ContactRecord]) -> String {
    if records.is_empty() {
        return "No rows found.\n".to_owned();
    }

    let mut out = String::new();
    for rec in records {
        let middle = rec.middle_name.as_deref().filter(|m| !m.is_empty()).unwrap_or("-");
        // Writing to a String cannot fail.
        let _ = writeln!(out, "Row {}:", rec.id);
        let _ = writeln!(out, "  First Name: {}", rec.first_name);
        let _ = writeln!(out, "  Middle Name: {middle}");
        let _ = writeln!(out, "  Last Name: {}", rec.last_name);
        let _ = writeln!(out, "  Phone: {}", rec.phone);
        let _ = writeln!(out, "  Email: {}", rec.email);
        let _ = writeln!(
            out,
            "  Flags: phone_dnc={} email_dnc={}",
            flag(rec.phone_dnc),
            flag(rec.email_dnc)
        );
        out.push('\n');
    }
    out
}

fn flag(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}
