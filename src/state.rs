use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use sha2::{Digest, Sha512};

use crate::{
    config::AppConfig,
    db::DbPool,
    policy::DbPolicy,
    services::{geocode::GeocodeService, suggest::SuggestionService},
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,
    pub geocoder: GeocodeService,
    pub suggestions: SuggestionService,
    pub cookie_key: Key,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db: DbPool,
        geocoder: GeocodeService,
        suggestions: SuggestionService,
    ) -> Self {
        let digest = Sha512::digest(config.cookie_secret.as_bytes());
        let cookie_key = Key::from(&digest[..]);
        Self {
            config,
            db,
            geocoder,
            suggestions,
            cookie_key,
        }
    }

    /// Fresh policy collaborator; checks always hit the database.
    pub fn policy(&self) -> DbPolicy {
        DbPolicy::new(self.db.clone())
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}
