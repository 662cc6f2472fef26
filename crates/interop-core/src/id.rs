/// Generate a new random identifier for events, deliveries and subscriptions.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
