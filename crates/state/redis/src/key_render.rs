use tollgate_state::StateKey;

/// Render a [`StateKey`] into a Redis key string with the given prefix.
///
/// The format is `prefix:kind/id`.
pub fn render_key(prefix: &str, key: &StateKey) -> String {
    format!("{}:{}/{}", prefix, key.kind, key.id)
}
