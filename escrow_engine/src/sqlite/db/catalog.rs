use sqlx::SqliteConnection;

use crate::db_types::{Package, PackageId, Travel, TravelId, UserId};

pub async fn upsert_travel(id: &TravelId, user: &UserId, conn: &mut SqliteConnection) -> Result<Travel, sqlx::Error> {
    let travel = sqlx::query_as(
        r#"
        INSERT INTO travels (id, user_id) VALUES ($1, $2)
        ON CONFLICT (id) DO UPDATE SET user_id = excluded.user_id
        RETURNING *;
        "#,
    )
    .bind(id)
    .bind(user)
    .fetch_one(conn)
    .await?;
    Ok(travel)
}

pub async fn upsert_package(
    id: &PackageId,
    user: &UserId,
    conn: &mut SqliteConnection,
) -> Result<Package, sqlx::Error> {
    let package = sqlx::query_as(
        r#"
        INSERT INTO packages (id, user_id) VALUES ($1, $2)
        ON CONFLICT (id) DO UPDATE SET user_id = excluded.user_id
        RETURNING *;
        "#,
    )
    .bind(id)
    .bind(user)
    .fetch_one(conn)
    .await?;
    Ok(package)
}

pub async fn fetch_travel(id: &TravelId, conn: &mut SqliteConnection) -> Result<Option<Travel>, sqlx::Error> {
    let travel = sqlx::query_as("SELECT * FROM travels WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(travel)
}

pub async fn fetch_package(id: &PackageId, conn: &mut SqliteConnection) -> Result<Option<Package>, sqlx::Error> {
    let package = sqlx::query_as("SELECT * FROM packages WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(package)
}
