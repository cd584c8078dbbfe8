use askama::Template;
use askama_axum::IntoResponse as AskamaTemplateResponse;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::error;

use crate::{
    auth::{AuthenticatedUser, CurrentUser},
    checklist::{days::calculate_trip_days, template::generate_checklist},
    db::DbPool,
    error::AppError,
    models::{
        group::{Group, GroupMember, GroupRole},
        settings::UserSetting,
        trip::TripType,
    },
    policy::AccessPolicy,
    state::AppState,
    util::mask_identifier,
};

use super::trips::{fetch_trip, insert_items};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(groups_list))
        .route("/new", get(group_new_form).post(group_new_submit))
        .route("/:group_id", get(group_detail))
        .route("/:group_id/delete", post(delete_group))
        .route("/:group_id/members", post(add_member))
        .route("/:group_id/members/remove", post(remove_member))
        .route(
            "/:group_id/trips/:trip_id/personal",
            post(create_personal_trip),
        )
}

#[derive(Clone)]
struct GroupSummaryRow {
    group_id: i64,
    group_name: String,
    role_label: String,
    member_count: i64,
}

#[derive(Template)]
#[template(path = "groups/list.html")]
struct GroupsListTemplate {
    groups: Vec<GroupSummaryRow>,
}

async fn groups_list(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Response, AppError> {
    let Some(user) = current.0 else {
        return Ok(Redirect::to("/login").into_response());
    };

    let rows: Vec<(i64, String, String, i64)> = sqlx::query_as(
        r#"SELECT g.group_id, g.group_name, gm.role,
                  (SELECT COUNT(*) FROM group_members c WHERE c.group_id = g.group_id)
           FROM groups g JOIN group_members gm ON gm.group_id = g.group_id
           WHERE gm.user_id = ?1
           ORDER BY g.created_at DESC"#,
    )
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;

    let groups = rows
        .into_iter()
        .map(|(group_id, group_name, role, member_count)| GroupSummaryRow {
            group_id,
            group_name,
            role_label: role_label(&role),
            member_count,
        })
        .collect();

    Ok(AskamaTemplateResponse::into_response(GroupsListTemplate {
        groups,
    }))
}

fn role_label(role: &str) -> String {
    match role {
        "admin" => "管理者".to_string(),
        _ => "メンバー".to_string(),
    }
}

#[derive(Template)]
#[template(path = "groups/new.html")]
struct GroupNewTemplate {
    show_error: bool,
    error_message: String,
    group_name: String,
}

async fn group_new_form(current: CurrentUser) -> Result<Response, AppError> {
    if current.0.is_none() {
        return Ok(Redirect::to("/login").into_response());
    }
    Ok(AskamaTemplateResponse::into_response(GroupNewTemplate {
        show_error: false,
        error_message: String::new(),
        group_name: String::new(),
    }))
}

#[derive(Deserialize)]
struct GroupForm {
    group_name: String,
    /// Comma- or newline-separated emails of the initial members.
    #[serde(default)]
    member_emails: String,
}

async fn group_new_submit(
    State(state): State<AppState>,
    current: CurrentUser,
    Form(form): Form<GroupForm>,
) -> Result<Response, AppError> {
    let Some(user) = current.0 else {
        return Ok(Redirect::to("/login").into_response());
    };

    let group_name = form.group_name.trim();
    if group_name.is_empty() {
        return Ok((
            StatusCode::BAD_REQUEST,
            AskamaTemplateResponse::into_response(GroupNewTemplate {
                show_error: true,
                error_message: "グループ名を入力してください".into(),
                group_name: form.group_name.clone(),
            }),
        )
            .into_response());
    }

    let now = Utc::now();
    let group_id: i64 = sqlx::query_scalar(
        "INSERT INTO groups (group_name, created_by, created_at) VALUES (?1, ?2, ?3) RETURNING group_id",
    )
    .bind(group_name)
    .bind(user.id)
    .bind(now)
    .fetch_one(&state.db)
    .await?;

    sqlx::query(
        "INSERT INTO group_members (group_id, user_id, role, joined_at) VALUES (?1, ?2, 'admin', ?3)",
    )
    .bind(group_id)
    .bind(user.id)
    .bind(now)
    .execute(&state.db)
    .await?;

    // Unknown addresses and duplicates are skipped silently.
    for email in form
        .member_emails
        .split(|c| c == ',' || c == '\n')
        .map(str::trim)
        .filter(|email| !email.is_empty())
    {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT user_id FROM user_setting WHERE email = ?1")
                .bind(email)
                .fetch_optional(&state.db)
                .await?;
        let Some(member_id) = found else {
            continue;
        };
        let already: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM group_members WHERE group_id = ?1 AND user_id = ?2",
        )
        .bind(group_id)
        .bind(member_id)
        .fetch_optional(&state.db)
        .await?;
        if already.is_none() {
            sqlx::query(
                "INSERT INTO group_members (group_id, user_id, role, joined_at) VALUES (?1, ?2, 'member', ?3)",
            )
            .bind(group_id)
            .bind(member_id)
            .bind(Utc::now())
            .execute(&state.db)
            .await?;
        }
    }

    Ok(Redirect::to(&format!("/groups/{group_id}")).into_response())
}

#[derive(Clone)]
struct MemberRow {
    user_id: i64,
    masked_name: String,
    masked_email: String,
    role_label: String,
    is_admin: bool,
}

#[derive(Clone)]
struct GroupTripRow {
    trip_id: i64,
    location_name: String,
    period: String,
    creator: String,
    has_personal: bool,
}

#[derive(Template)]
#[template(path = "groups/detail.html")]
struct GroupDetailTemplate {
    group_id: i64,
    group_name: String,
    viewer_is_admin: bool,
    viewer_id: i64,
    members: Vec<MemberRow>,
    trips: Vec<GroupTripRow>,
    show_error: bool,
    error_message: String,
}

async fn group_detail(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(group_id): Path<i64>,
) -> Result<Response, AppError> {
    let Some(user) = current.0 else {
        return Ok(Redirect::to("/login").into_response());
    };
    render_group_detail(&state, &user, group_id, None).await
}

/// Shared by the GET page and the failed POST actions, which re-render the
/// page with a localized error banner.
async fn render_group_detail(
    state: &AppState,
    user: &AuthenticatedUser,
    group_id: i64,
    error_message: Option<String>,
) -> Result<Response, AppError> {
    let Some(role) = state.policy().membership(user.id, group_id).await? else {
        return Ok(Redirect::to("/groups").into_response());
    };

    let group = sqlx::query_as::<_, Group>(
        "SELECT group_id, group_name, created_by, created_at FROM groups WHERE group_id = ?1",
    )
    .bind(group_id)
    .fetch_optional(&state.db)
    .await?;
    let Some(group) = group else {
        return Ok(Redirect::to("/groups").into_response());
    };

    let member_rows = sqlx::query_as::<_, GroupMember>(
        r#"SELECT id, group_id, user_id, role, joined_at
           FROM group_members WHERE group_id = ?1 ORDER BY joined_at ASC"#,
    )
    .bind(group_id)
    .fetch_all(&state.db)
    .await?;

    let mut members = Vec::with_capacity(member_rows.len());
    for member in &member_rows {
        let setting = fetch_user_setting(&state.db, member.user_id).await?;
        members.push(MemberRow {
            user_id: member.user_id,
            masked_name: mask_identifier(
                setting
                    .as_ref()
                    .and_then(|s| s.name.as_deref())
                    .unwrap_or_default(),
                4,
            ),
            masked_email: mask_identifier(
                setting.as_ref().map(|s| s.email.as_str()).unwrap_or_default(),
                4,
            ),
            role_label: role_label(&member.role),
            is_admin: member.is_admin(),
        });
    }

    let trips = fetch_group_trip_rows(&state.db, group_id, user.id).await?;

    let has_error = error_message.is_some();
    Ok(AskamaTemplateResponse::into_response(GroupDetailTemplate {
        group_id,
        group_name: group.group_name,
        viewer_is_admin: role == GroupRole::Admin,
        viewer_id: user.id,
        members,
        trips,
        show_error: has_error,
        error_message: error_message.unwrap_or_default(),
    }))
}

async fn fetch_user_setting(db: &DbPool, user_id: i64) -> Result<Option<UserSetting>, AppError> {
    let setting = sqlx::query_as::<_, UserSetting>(
        r#"SELECT user_id, name, email, hide_completed, ai_suggestion_counts
           FROM user_setting WHERE user_id = ?1"#,
    )
    .bind(user_id)
    .fetch_optional(db)
    .await?;
    Ok(setting)
}

async fn fetch_group_trip_rows(
    db: &DbPool,
    group_id: i64,
    viewer_id: i64,
) -> Result<Vec<GroupTripRow>, AppError> {
    let trips: Vec<(i64, String, String, String, i64)> = sqlx::query_as(
        r#"SELECT t.trip_id, t.location_name, t.start_date, t.end_date, t.user_id
           FROM trips t
           WHERE t.group_id = ?1 AND t.trip_type = 'group'
           ORDER BY t.start_date DESC"#,
    )
    .bind(group_id)
    .fetch_all(db)
    .await?;

    let linked_group_trips: Vec<i64> =
        sqlx::query_scalar("SELECT group_trip_id FROM trip_links WHERE user_id = ?1")
            .bind(viewer_id)
            .fetch_all(db)
            .await?;

    let mut rows = Vec::with_capacity(trips.len());
    for (trip_id, location_name, start_date, end_date, creator_id) in trips {
        let creator = fetch_user_setting(db, creator_id)
            .await?
            .map(|setting| setting.display_name().to_string())
            .unwrap_or_default();
        rows.push(GroupTripRow {
            trip_id,
            location_name,
            period: format!("{start_date} 〜 {end_date}"),
            creator,
            has_personal: linked_group_trips.contains(&trip_id),
        });
    }
    Ok(rows)
}

async fn delete_group(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(group_id): Path<i64>,
) -> Result<Response, AppError> {
    let Some(user) = current.0 else {
        return Ok(Redirect::to("/login").into_response());
    };
    match state.policy().require_group_admin(user.id, group_id).await {
        Ok(()) => {}
        Err(AppError::Forbidden) => {
            return render_group_detail(
                &state,
                &user,
                group_id,
                Some("グループを削除する権限がありません".into()),
            )
            .await;
        }
        Err(err) => return Err(err),
    }

    // Child rows first: the group's trips with their items and links, then
    // the membership rows, then the group itself.
    let trip_ids: Vec<i64> =
        sqlx::query_scalar("SELECT trip_id FROM trips WHERE group_id = ?1")
            .bind(group_id)
            .fetch_all(&state.db)
            .await?;
    for trip_id in trip_ids {
        sqlx::query("DELETE FROM items WHERE trip_id = ?1")
            .bind(trip_id)
            .execute(&state.db)
            .await?;
        sqlx::query("DELETE FROM trip_links WHERE group_trip_id = ?1 OR personal_trip_id = ?1")
            .bind(trip_id)
            .execute(&state.db)
            .await?;
        sqlx::query("DELETE FROM trips WHERE trip_id = ?1")
            .bind(trip_id)
            .execute(&state.db)
            .await?;
    }
    sqlx::query("DELETE FROM group_members WHERE group_id = ?1")
        .bind(group_id)
        .execute(&state.db)
        .await?;
    sqlx::query("DELETE FROM groups WHERE group_id = ?1")
        .bind(group_id)
        .execute(&state.db)
        .await?;

    Ok(Redirect::to("/groups").into_response())
}

#[derive(Deserialize)]
struct AddMemberForm {
    email: String,
}

async fn add_member(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(group_id): Path<i64>,
    Form(form): Form<AddMemberForm>,
) -> Result<Response, AppError> {
    let Some(user) = current.0 else {
        return Ok(Redirect::to("/login").into_response());
    };
    if state.policy().membership(user.id, group_id).await?.is_none() {
        return render_group_detail(
            &state,
            &user,
            group_id,
            Some("グループのメンバーのみメンバーを追加できます".into()),
        )
        .await;
    }

    let email = form.email.trim();
    let found: Option<i64> =
        sqlx::query_scalar("SELECT user_id FROM user_setting WHERE email = ?1")
            .bind(email)
            .fetch_optional(&state.db)
            .await?;
    let Some(member_id) = found else {
        return render_group_detail(
            &state,
            &user,
            group_id,
            Some("指定されたメールアドレスのユーザーが見つかりません".into()),
        )
        .await;
    };

    let already: Option<i64> =
        sqlx::query_scalar("SELECT id FROM group_members WHERE group_id = ?1 AND user_id = ?2")
            .bind(group_id)
            .bind(member_id)
            .fetch_optional(&state.db)
            .await?;
    if already.is_some() {
        return render_group_detail(
            &state,
            &user,
            group_id,
            Some("このユーザーは既にグループのメンバーです".into()),
        )
        .await;
    }

    sqlx::query(
        "INSERT INTO group_members (group_id, user_id, role, joined_at) VALUES (?1, ?2, 'member', ?3)",
    )
    .bind(group_id)
    .bind(member_id)
    .bind(Utc::now())
    .execute(&state.db)
    .await?;

    Ok(Redirect::to(&format!("/groups/{group_id}")).into_response())
}

#[derive(Deserialize)]
struct RemoveMemberForm {
    member_user_id: i64,
}

async fn remove_member(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(group_id): Path<i64>,
    Form(form): Form<RemoveMemberForm>,
) -> Result<Response, AppError> {
    let Some(user) = current.0 else {
        return Ok(Redirect::to("/login").into_response());
    };

    match state
        .policy()
        .authorize_member_removal(group_id, user.id, form.member_user_id)
        .await
    {
        Ok(()) => {}
        Err(AppError::BadRequest(msg)) => {
            return render_group_detail(&state, &user, group_id, Some(msg)).await;
        }
        Err(AppError::Forbidden) => {
            return render_group_detail(
                &state,
                &user,
                group_id,
                Some("メンバーを削除する権限がありません".into()),
            )
            .await;
        }
        Err(err) => return Err(err),
    }

    sqlx::query("DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2")
        .bind(group_id)
        .bind(form.member_user_id)
        .execute(&state.db)
        .await?;

    if form.member_user_id == user.id {
        Ok(Redirect::to("/groups").into_response())
    } else {
        Ok(Redirect::to(&format!("/groups/{group_id}")).into_response())
    }
}

async fn create_personal_trip(
    State(state): State<AppState>,
    current: CurrentUser,
    Path((group_id, trip_id)): Path<(i64, i64)>,
) -> Result<Response, AppError> {
    let Some(user) = current.0 else {
        return Ok(Redirect::to("/login").into_response());
    };

    match create_personal_trip_from_group(&state, user.id, group_id, trip_id).await {
        Ok(new_trip_id) => Ok(Redirect::to(&format!("/checklist/{new_trip_id}")).into_response()),
        Err(AppError::BadRequest(msg)) => {
            render_group_detail(&state, &user, group_id, Some(msg)).await
        }
        Err(AppError::Forbidden) => {
            render_group_detail(
                &state,
                &user,
                group_id,
                Some("このグループにアクセスする権限がありません".into()),
            )
            .await
        }
        Err(err) => Err(err),
    }
}

/// Copies a group trip into a personal one for the current user, linked to
/// the original. The three inserts run sequentially; a later failure rolls
/// the earlier rows back with best-effort deletes.
pub async fn create_personal_trip_from_group(
    state: &AppState,
    user_id: i64,
    group_id: i64,
    group_trip_id: i64,
) -> Result<i64, AppError> {
    let group_trip = fetch_trip(&state.db, group_trip_id)
        .await?
        .filter(|trip| trip.is_group() && trip.group_id == Some(group_id))
        .ok_or_else(|| AppError::BadRequest("グループ旅行が見つかりません".into()))?;

    let (Some(lat), Some(lng)) = (group_trip.latitude, group_trip.longitude) else {
        return Err(AppError::BadRequest(
            "グループ旅行に位置情報が設定されていません".into(),
        ));
    };

    state.policy().require_group_member(user_id, group_id).await?;

    let existing: Option<i64> = sqlx::query_scalar(
        "SELECT personal_trip_id FROM trip_links WHERE group_trip_id = ?1 AND user_id = ?2",
    )
    .bind(group_trip_id)
    .bind(user_id)
    .fetch_optional(&state.db)
    .await?;
    if existing.is_some() {
        return Err(AppError::BadRequest("既に個人版の旅行が存在します".into()));
    }

    let new_trip_id: i64 = sqlx::query_scalar(
        r#"INSERT INTO trips (user_id, location_name, latitude, longitude, start_date,
                              end_date, trip_type, group_id, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'personal', NULL, ?7) RETURNING trip_id"#,
    )
    .bind(user_id)
    .bind(&group_trip.location_name)
    .bind(lat)
    .bind(lng)
    .bind(group_trip.start_date)
    .bind(group_trip.end_date)
    .bind(Utc::now())
    .fetch_one(&state.db)
    .await?;

    if let Err(err) = sqlx::query(
        r#"INSERT INTO trip_links (group_trip_id, personal_trip_id, user_id, created_at)
           VALUES (?1, ?2, ?3, ?4)"#,
    )
    .bind(group_trip_id)
    .bind(new_trip_id)
    .bind(user_id)
    .bind(Utc::now())
    .execute(&state.db)
    .await
    {
        error!("trip link insert failed: {err}");
        rollback_trip(&state.db, new_trip_id, false).await;
        return Err(AppError::BadRequest("旅行の関連付けに失敗しました".into()));
    }

    let days = calculate_trip_days(group_trip.start_date, group_trip.end_date);
    let rows = generate_checklist(new_trip_id, lat, lng, days, TripType::Personal);
    if let Err(err) = insert_items(&state.db, &rows).await {
        error!("personal checklist insert failed: {err}");
        rollback_trip(&state.db, new_trip_id, true).await;
        return Err(AppError::BadRequest(
            "チェックリストの作成に失敗しました".into(),
        ));
    }

    Ok(new_trip_id)
}

/// Best-effort cleanup for a half-created personal trip; failures are only
/// logged.
async fn rollback_trip(db: &DbPool, trip_id: i64, drop_link: bool) {
    if drop_link {
        if let Err(err) = sqlx::query("DELETE FROM trip_links WHERE personal_trip_id = ?1")
            .bind(trip_id)
            .execute(db)
            .await
        {
            error!("rollback: trip link delete failed: {err}");
        }
    }
    if let Err(err) = sqlx::query("DELETE FROM trips WHERE trip_id = ?1")
        .bind(trip_id)
        .execute(db)
        .await
    {
        error!("rollback: trip delete failed: {err}");
    }
}
