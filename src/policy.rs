use async_trait::async_trait;

use crate::{
    db::DbPool,
    error::AppError,
    models::{group::GroupRole, trip::Trip},
};

/// Authorization checks shared by every handler that touches a trip or a
/// group. Answers are re-derived from the database on each call; nothing is
/// cached across requests.
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    /// The caller's role in a group, if they belong to it.
    async fn membership(&self, user_id: i64, group_id: i64) -> Result<Option<GroupRole>, AppError>;

    /// Owner of the trip, or member of the trip's group.
    async fn can_view_trip(&self, user_id: i64, trip: &Trip) -> Result<bool, AppError>;

    async fn require_trip_access(&self, user_id: i64, trip: &Trip) -> Result<(), AppError> {
        if self.can_view_trip(user_id, trip).await? {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }

    /// Deletion is allowed to the owner, and to admins of the trip's group.
    async fn require_trip_delete(&self, user_id: i64, trip: &Trip) -> Result<(), AppError> {
        if trip.user_id == user_id {
            return Ok(());
        }
        if let Some(group_id) = trip.group_id {
            if self.membership(user_id, group_id).await? == Some(GroupRole::Admin) {
                return Ok(());
            }
        }
        Err(AppError::Forbidden)
    }

    async fn require_group_member(
        &self,
        user_id: i64,
        group_id: i64,
    ) -> Result<GroupRole, AppError> {
        self.membership(user_id, group_id)
            .await?
            .ok_or(AppError::Forbidden)
    }

    async fn require_group_admin(&self, user_id: i64, group_id: i64) -> Result<(), AppError> {
        match self.membership(user_id, group_id).await? {
            Some(GroupRole::Admin) => Ok(()),
            _ => Err(AppError::Forbidden),
        }
    }

    /// Admins may remove anyone, members only themselves, and the last
    /// admin of a group can never be removed.
    async fn authorize_member_removal(
        &self,
        group_id: i64,
        actor_id: i64,
        target_user_id: i64,
    ) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct DbPolicy {
    db: DbPool,
}

impl DbPolicy {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AccessPolicy for DbPolicy {
    async fn membership(&self, user_id: i64, group_id: i64) -> Result<Option<GroupRole>, AppError> {
        let role: Option<String> = sqlx::query_scalar(
            "SELECT role FROM group_members WHERE group_id = ?1 AND user_id = ?2",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(role.map(|role| match role.as_str() {
            "admin" => GroupRole::Admin,
            _ => GroupRole::Member,
        }))
    }

    async fn can_view_trip(&self, user_id: i64, trip: &Trip) -> Result<bool, AppError> {
        if trip.user_id == user_id {
            return Ok(true);
        }
        if trip.is_group() {
            if let Some(group_id) = trip.group_id {
                return Ok(self.membership(user_id, group_id).await?.is_some());
            }
        }
        Ok(false)
    }

    async fn authorize_member_removal(
        &self,
        group_id: i64,
        actor_id: i64,
        target_user_id: i64,
    ) -> Result<(), AppError> {
        let actor_role = self.membership(actor_id, group_id).await?;
        let is_admin = actor_role == Some(GroupRole::Admin);
        if !is_admin && actor_id != target_user_id {
            return Err(AppError::Forbidden);
        }

        let target_role: Option<String> = sqlx::query_scalar(
            "SELECT role FROM group_members WHERE group_id = ?1 AND user_id = ?2",
        )
        .bind(group_id)
        .bind(target_user_id)
        .fetch_optional(&self.db)
        .await?;
        let Some(target_role) = target_role else {
            return Err(AppError::NotFound);
        };

        if target_role == "admin" {
            let admin_count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM group_members WHERE group_id = ?1 AND role = 'admin'",
            )
            .bind(group_id)
            .fetch_one(&self.db)
            .await?;
            if admin_count <= 1 {
                return Err(AppError::BadRequest("最後の管理者は削除できません".into()));
            }
        }

        Ok(())
    }
}
