use actix_web::{HttpResponse, Scope, get, web};

use crate::model::common::AppState;

pub fn routers() -> Scope {
    web::scope("/health").service(state)
}

#[get("")]
async fn state(data: web::Data<AppState>) -> HttpResponse {
    let database = match data.database_connection.ping().await {
        Ok(()) => "UP",
        Err(_) => "DOWN",
    };

    HttpResponse::Ok().json(serde_json::json!({
        "status": "UP",
        "mode": data.mode(),
        "database": database,
    }))
}
