//! User field lookup and claim attribute templates for `JWT-Custom` tokens.

use crate::oauth::types::{JwtItem, User};
use serde_json::{Map, Value};

const EXISTING_FIELD: &str = "Existing Field";
const PROPERTIES_PREFIX: &str = "Properties.";

/// `DisplayName` -> `displayName`, `permissionNames` -> `permissionNames`.
pub fn lower_camel(field: &str) -> String {
    let mut chars = field.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `EmailVerified` -> `email_verified`.
fn snake_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len() + 4);
    for (i, c) in field.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Look up a plain user field by its record name (`DisplayName`, `Email`, `IsAdmin`, ...).
pub fn user_field(user_json: &Map<String, Value>, field: &str) -> Option<Value> {
    user_json
        .get(&lower_camel(field))
        .or_else(|| user_json.get(&snake_case(field)))
        .cloned()
}

fn property(user: &User, field: &str) -> Option<Value> {
    let name = field.strip_prefix(PROPERTIES_PREFIX)?;
    if name.is_empty() || name.contains('.') {
        return None;
    }
    user.properties.get(name).map(|v| Value::String(v.clone()))
}

fn string_array(values: Vec<String>) -> Value {
    Value::Array(values.into_iter().map(Value::String).collect())
}

/// Resolve an `Existing Field` attribute value.
///
/// `Roles` and `Permissions` become arrays of names, `Properties.<key>` reads a
/// custom property, anything else is a plain user field.
pub fn get_user_field_value(user: &User, user_json: &Map<String, Value>, field: &str) -> Option<Value> {
    match field {
        "Roles" => return Some(string_array(user.role_names())),
        "Permissions" | "permissionNames" => return Some(string_array(user.permission_names())),
        _ => {}
    }
    if field.starts_with(PROPERTIES_PREFIX) {
        return property(user, field);
    }
    user_field(user_json, field)
}

fn replace_values(placeholder: &str, replacement: &str, values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.replace(placeholder, replacement))
        .collect()
}

fn replace_values_with_list(
    placeholder: &str,
    replacements: &[String],
    values: Vec<String>,
) -> Vec<String> {
    values
        .iter()
        .flat_map(|v| replacements.iter().map(move |r| v.replace(placeholder, r)))
        .collect()
}

/// Expand `$user.<field>` placeholders in a static attribute value.
///
/// List placeholders (`$user.roles`, `$user.permissions`, `$user.groups`) fan the
/// template out into one value per element; an empty list yields no values.
pub fn replace_attribute_value(user: &User, value: &str) -> Vec<String> {
    let mut values = vec![value.to_string()];

    if value.contains("$user.roles") {
        values = replace_values_with_list("$user.roles", &user.role_names(), values);
    }
    if value.contains("$user.permissions") {
        values = replace_values_with_list("$user.permissions", &user.permission_names(), values);
    }
    if value.contains("$user.groups") {
        values = replace_values_with_list("$user.groups", &user.groups, values);
    }

    values = replace_values("$user.owner", &user.owner, values);
    values = replace_values("$user.name", &user.name, values);
    values = replace_values("$user.email", &user.email, values);
    values = replace_values("$user.id", &user.id, values);
    replace_values("$user.phone", &user.phone, values)
}

/// Append selected user fields to a custom claim map.
pub fn apply_token_fields(
    claims: &mut Map<String, Value>,
    user: &User,
    user_json: &Map<String, Value>,
    token_fields: &[String],
) {
    for field in token_fields {
        if let Some(name) = field.strip_prefix(PROPERTIES_PREFIX) {
            if let Some(value) = property(user, field) {
                claims.insert(name.to_string(), value);
            }
        } else if field == "permissionNames" {
            claims.insert(
                field.to_string(),
                string_array(user.permission_names()),
            );
        } else if field == "signinMethod" || field == "provider" {
            // grant context, handled by the claims builder
        } else if let Some(value) = user_field(user_json, field) {
            claims.insert(lower_camel(field), value);
        }
    }
}

/// Append configured claim attributes to a custom claim map.
pub fn apply_token_attributes(
    claims: &mut Map<String, Value>,
    user: &User,
    user_json: &Map<String, Value>,
    attributes: &[JwtItem],
) {
    for item in attributes {
        let value = if item.category == EXISTING_FIELD {
            match get_user_field_value(user, user_json, &item.value) {
                Some(value) => value,
                None => continue,
            }
        } else {
            let mut values = replace_attribute_value(user, &item.value);
            if values.is_empty() {
                continue;
            }
            if item.item_type == "String" {
                Value::String(values.swap_remove(0))
            } else {
                string_array(values)
            }
        };
        claims.insert(item.name.clone(), value);
    }
}
