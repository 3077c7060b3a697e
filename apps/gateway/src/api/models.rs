use axum::extract::State;
use axum::Json;

use crate::openai::ModelList;
use crate::state::AppState;

/// `GET /v1/models`: the static list of served model ids.
pub async fn list_models(State(state): State<AppState>) -> Json<ModelList> {
    Json(ModelList::from_ids(&state.config.served_models))
}
