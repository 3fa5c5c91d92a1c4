use actix_web::{Scope, web};

use crate::api::{audit, flags, health, incidents, saved_views};

pub fn routers() -> Scope {
    web::scope("/api")
        .service(health::routers())
        .service(incidents::routers())
        .service(flags::routers())
        .service(audit::routers())
        .service(saved_views::routers())
}
