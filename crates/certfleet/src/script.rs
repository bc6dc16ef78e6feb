//! Setup script template rendering.
//!
//! Templates use `{{name}}` placeholders. Rendering is plain textual
//! substitution; unknown placeholders are left in place so a typo in
//! the template surfaces verbatim in the dispatched script instead of
//! vanishing silently.

use std::collections::BTreeMap;

/// Replace every `{{name}}` occurrence with its value.
pub fn render_template(template: &str, values: &BTreeMap<&str, String>) -> String {
    let mut rendered = template.to_string();
    for (name, value) in values {
        rendered = rendered.replace(&format!("{{{{{name}}}}}"), value);
    }
    rendered
}
