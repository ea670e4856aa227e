use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Registrant record as held by the user store.
#[derive(Debug, Clone, FromRow)]
pub struct UserRecord {
    pub id: Uuid,
    pub identity: String,
    pub credential: String, // opaque to the core (Argon2 PHC string in practice)
    pub active: bool,       // false while pending confirmation
    pub created_at: OffsetDateTime,
}

impl UserRecord {
    pub fn pending(identity: &str, credential: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity: identity.to_owned(),
            credential: credential.to_owned(),
            active: false,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}
