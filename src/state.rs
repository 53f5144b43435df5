use crate::auth::AdminAuth;
use crate::store::QuestionStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn QuestionStore>,
    pub admin: Arc<AdminAuth>,
    pub allowed_origins: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(store: Arc<dyn QuestionStore>, admin: AdminAuth, allowed_origins: Vec<String>) -> Self {
        Self {
            store,
            admin: Arc::new(admin),
            allowed_origins: Arc::new(allowed_origins),
        }
    }
}
