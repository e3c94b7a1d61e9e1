//! Subject templating for outbound messages.
//!
//! Placeholders are delimited by `$` and name a namespace and a key:
//!
//! | Placeholder           | Resolves to                        |
//! |-----------------------|------------------------------------|
//! | `$sender.<key>$`      | sender identity attribute          |
//! | `$receiver.<key>$`    | receiver identity attribute        |
//! | `$attributes.<key>$`  | partnership attribute              |
//! | `$header.<name>$`     | message header (case-insensitive)  |
//!
//! `$$` renders a literal `$`.

use kestrel_common::Message;

use crate::error::PartnershipError;

/// Render `template` against the message and its (resolved) partnership.
///
/// # Errors
/// If a placeholder is unterminated, uses an unknown namespace, or names a
/// value that is not present.
pub fn render_subject(template: &str, message: &Message) -> Result<String, PartnershipError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('$') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        let end = after
            .find('$')
            .ok_or_else(|| PartnershipError::template(template, "unterminated placeholder"))?;
        let placeholder = &after[..end];

        if placeholder.is_empty() {
            out.push('$');
        } else {
            out.push_str(&lookup(template, placeholder, message)?);
        }

        rest = &after[end + 1..];
    }
    out.push_str(rest);

    Ok(out)
}

fn lookup(template: &str, placeholder: &str, message: &Message) -> Result<String, PartnershipError> {
    let (namespace, key) = placeholder.split_once('.').ok_or_else(|| {
        PartnershipError::template(template, format!("placeholder '{placeholder}' has no key"))
    })?;

    let partnership = &message.partnership;
    let value = match namespace {
        "sender" => partnership.sender_id(key),
        "receiver" => partnership.receiver_id(key),
        "attributes" => partnership.attributes.get(key).map(String::as_str),
        "header" => message.headers.get(key),
        _ => {
            return Err(PartnershipError::template(
                template,
                format!("unknown placeholder namespace '{namespace}'"),
            ));
        }
    };

    value.map(str::to_string).ok_or_else(|| {
        PartnershipError::template(template, format!("no value for '{placeholder}'"))
    })
}
