use sqlx::{postgres::PgPoolOptions, PgPool};

pub async fn init_pool(database_url: &str) -> PgPool {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(std::time::Duration::from_secs(10))
        .connect(database_url)
        .await;

    match pool {
        Ok(p) => {
            tracing::info!("connected to document store");
            p
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to document store");
            panic!("failed to connect to DB: {:?}", e);
        }
    }
}
