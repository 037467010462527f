pub fn render_index(template: &str, relay_energized: bool) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('%') {
            Some(end) if is_placeholder(&after[..end]) => {
                if &after[..end] == "STATE" {
                    out.push_str(relay_state_label(relay_energized));
                }
                rest = &after[end + 1..];
            }
            _ => {
                out.push('%');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

pub fn relay_state_label(relay_energized: bool) -> &'static str {
    if relay_energized {
        "ON"
    } else {
        "OFF"
    }
}

fn is_placeholder(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|byte| byte.is_ascii_uppercase() || byte.is_ascii_digit() || byte == b'_')
}
