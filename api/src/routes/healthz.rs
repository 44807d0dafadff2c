use actix_web::{HttpResponse, get};

#[get("/healthz")]
pub async fn healthz() -> HttpResponse {
    HttpResponse::Ok().finish()
}
