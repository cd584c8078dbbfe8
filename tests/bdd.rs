use std::{collections::HashMap, fmt, fs::File, net::SocketAddr};

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use cucumber::{given, then, when, World as _};
use tempfile::TempDir;
use triplist::{
    auth::{self, AuthenticatedUser},
    checklist::{days::calculate_trip_days, template::generate_checklist},
    config::AppConfig,
    db::init_pool,
    error::AppError,
    policy::AccessPolicy,
    routes::groups::create_personal_trip_from_group,
    routes::trips::{fetch_trip, insert_items},
    services::{geocode::GeocodeService, suggest::SuggestionService},
    state::AppState,
};

#[derive(Debug, cucumber::World, Default)]
struct AppWorld {
    state: Option<TestState>,
    users: HashMap<String, AuthenticatedUser>,
    current_trip: Option<i64>,
    group_id: Option<i64>,
    group_trip_id: Option<i64>,
    last_error: Option<String>,
}

impl AppWorld {
    fn app(&self) -> &AppState {
        self.state
            .as_ref()
            .expect("state must be initialised first")
            .app()
    }

    fn user(&self, name: &str) -> &AuthenticatedUser {
        self.users
            .get(name)
            .unwrap_or_else(|| panic!("user {name} must be registered first"))
    }
}

struct TestState {
    app: AppState,
    _root: TempDir,
}

impl fmt::Debug for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestState").finish()
    }
}

impl TestState {
    async fn new() -> anyhow::Result<Self> {
        let root = TempDir::new().context("create temp dir for bdd world")?;

        let db_path = root.path().join("bdd.sqlite");
        File::create(&db_path)?;
        let database_url = format!("sqlite://{}", db_path.to_string_lossy());

        let config = AppConfig {
            database_url: database_url.clone(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            cookie_secret: "bdd-cookie-secret".into(),
            geocoding_base_url: "http://127.0.0.1:9".into(),
            geocoding_api_key: String::new(),
            ai_base_url: "http://127.0.0.1:9".into(),
            ai_api_key: String::new(),
            ai_daily_limit: 3,
            environment: "test".into(),
        };

        let db = init_pool(&config.database_url).await?;
        sqlx::migrate!("./migrations").run(&db).await?;

        let geocoder = GeocodeService::new(
            config.geocoding_base_url.clone(),
            config.geocoding_api_key.clone(),
        );
        let suggestions =
            SuggestionService::new(config.ai_base_url.clone(), config.ai_api_key.clone(), true);

        let app = AppState::new(config, db, geocoder, suggestions);
        Ok(Self { app, _root: root })
    }

    fn app(&self) -> &AppState {
        &self.app
    }
}

#[given("a fresh application state")]
async fn given_fresh_state(world: &mut AppWorld) {
    world.state = Some(TestState::new().await.expect("state"));
    world.users.clear();
    world.current_trip = None;
    world.group_id = None;
    world.group_trip_id = None;
    world.last_error = None;
}

#[given(
    regex = r#"^a registered user \"([^\"]+)\" with email \"([^\"]+)\" and password \"([^\"]+)\"$"#
)]
async fn given_registered_user(
    world: &mut AppWorld,
    username: String,
    email: String,
    password: String,
) {
    register_user(world, username, email, password).await;
}

#[when(
    regex = r#"^I register a user \"([^\"]+)\" with email \"([^\"]+)\" and password \"([^\"]+)\"$"#
)]
async fn when_register_user(
    world: &mut AppWorld,
    username: String,
    email: String,
    password: String,
) {
    register_user(world, username, email, password).await;
}

#[when(
    regex = r#"^I try to register a user \"([^\"]+)\" with email \"([^\"]+)\" and password \"([^\"]+)\"$"#
)]
async fn when_try_register_user(
    world: &mut AppWorld,
    username: String,
    email: String,
    password: String,
) {
    match auth::register_user(world.app(), &username, &email, &password).await {
        Ok(user) => {
            world.users.insert(username, user);
            world.last_error = None;
        }
        Err(AppError::BadRequest(msg)) => world.last_error = Some(msg),
        Err(err) => panic!("unexpected registration error: {err}"),
    }
}

#[then(regex = r#"^registration fails with message \"([^\"]+)\"$"#)]
async fn then_registration_fails(world: &mut AppWorld, expected: String) {
    assert_eq!(world.last_error.as_deref(), Some(expected.as_str()));
}

#[then(regex = r#"^I can authenticate as \"([^\"]+)\" using password \"([^\"]+)\"$"#)]
async fn then_can_authenticate(world: &mut AppWorld, identifier: String, password: String) {
    let authed = auth::authenticate_user(world.app(), &identifier, &password)
        .await
        .expect("authentication");
    assert_eq!(authed.username, identifier);
}

#[given(
    regex = r#"^\"([^\"]+)\" has a personal trip to \"([^\"]+)\" at (-?[0-9.]+), (-?[0-9.]+) from \"([^\"]+)\" to \"([^\"]+)\"$"#
)]
async fn given_personal_trip(
    world: &mut AppWorld,
    username: String,
    location: String,
    latitude: f64,
    longitude: f64,
    start: String,
    end: String,
) {
    let user_id = world.user(&username).id;
    let trip_id = insert_trip(
        world,
        user_id,
        &location,
        latitude,
        longitude,
        &start,
        &end,
        "personal",
        None,
    )
    .await;
    world.current_trip = Some(trip_id);
}

#[given(
    regex = r#"^a group trip to \"([^\"]+)\" at (-?[0-9.]+), (-?[0-9.]+) from \"([^\"]+)\" to \"([^\"]+)\" created by \"([^\"]+)\"$"#
)]
async fn given_group_trip(
    world: &mut AppWorld,
    location: String,
    latitude: f64,
    longitude: f64,
    start: String,
    end: String,
    username: String,
) {
    let user_id = world.user(&username).id;
    let group_id = world.group_id.expect("group must exist first");
    let trip_id = insert_trip(
        world,
        user_id,
        &location,
        latitude,
        longitude,
        &start,
        &end,
        "group",
        Some(group_id),
    )
    .await;
    world.group_trip_id = Some(trip_id);
}

#[when("the default checklist is generated for that trip")]
async fn when_generate_checklist(world: &mut AppWorld) {
    let trip_id = world.current_trip.expect("trip must exist first");
    let trip = fetch_trip(&world.app().db, trip_id)
        .await
        .expect("fetch trip")
        .expect("trip row");
    let days = calculate_trip_days(trip.start_date, trip.end_date);
    let rows = generate_checklist(
        trip.trip_id,
        trip.latitude.expect("latitude"),
        trip.longitude.expect("longitude"),
        days,
        trip.trip_type(),
    );
    insert_items(&world.app().db, &rows)
        .await
        .expect("insert checklist rows");
}

#[then(regex = r"^the trip has (\d+) checklist items$")]
async fn then_trip_has_items(world: &mut AppWorld, expected: i64) {
    let trip_id = world.current_trip.expect("trip must exist first");
    assert_eq!(count_items(world, trip_id).await, expected);
}

#[then(regex = r#"^the checklist contains \"([^\"]+)\"$"#)]
async fn then_checklist_contains(world: &mut AppWorld, name: String) {
    let trip_id = world.current_trip.expect("trip must exist first");
    assert!(item_names(world, trip_id).await.contains(&name));
}

#[then(regex = r#"^the checklist does not contain \"([^\"]+)\"$"#)]
async fn then_checklist_lacks(world: &mut AppWorld, name: String) {
    let trip_id = world.current_trip.expect("trip must exist first");
    assert!(!item_names(world, trip_id).await.contains(&name));
}

#[then(regex = r#"^the checklist item \"([^\"]+)\" has quantity (\d+)$"#)]
async fn then_item_quantity(world: &mut AppWorld, name: String, expected: i64) {
    let trip_id = world.current_trip.expect("trip must exist first");
    let quantity: i64 = sqlx::query_scalar(
        "SELECT quantity FROM items WHERE trip_id = ?1 AND item_name = ?2",
    )
    .bind(trip_id)
    .bind(&name)
    .fetch_one(&world.app().db)
    .await
    .expect("item row");
    assert_eq!(quantity, expected);
}

#[given(regex = r#"^a group \"([^\"]+)\" created by \"([^\"]+)\" with member \"([^\"]+)\"$"#)]
async fn given_group(world: &mut AppWorld, group_name: String, creator: String, member: String) {
    let creator_id = world.user(&creator).id;
    let member_id = world.user(&member).id;
    let db = world.app().db.clone();

    let group_id: i64 = sqlx::query_scalar(
        "INSERT INTO groups (group_name, created_by, created_at) VALUES (?1, ?2, ?3) RETURNING group_id",
    )
    .bind(&group_name)
    .bind(creator_id)
    .bind(Utc::now())
    .fetch_one(&db)
    .await
    .expect("insert group");

    sqlx::query(
        "INSERT INTO group_members (group_id, user_id, role, joined_at) VALUES (?1, ?2, 'admin', ?3)",
    )
    .bind(group_id)
    .bind(creator_id)
    .bind(Utc::now())
    .execute(&db)
    .await
    .expect("insert admin");

    if member_id != creator_id {
        sqlx::query(
            "INSERT INTO group_members (group_id, user_id, role, joined_at) VALUES (?1, ?2, 'member', ?3)",
        )
        .bind(group_id)
        .bind(member_id)
        .bind(Utc::now())
        .execute(&db)
        .await
        .expect("insert member");
    }

    world.group_id = Some(group_id);
}

#[then(regex = r#"^removing \"([^\"]+)\" from the group as \"([^\"]+)\" succeeds$"#)]
async fn then_removal_succeeds(world: &mut AppWorld, target: String, actor: String) {
    let group_id = world.group_id.expect("group must exist first");
    let actor_id = world.user(&actor).id;
    let target_id = world.user(&target).id;
    world
        .app()
        .policy()
        .authorize_member_removal(group_id, actor_id, target_id)
        .await
        .expect("removal should be allowed");
    sqlx::query("DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2")
        .bind(group_id)
        .bind(target_id)
        .execute(&world.app().db)
        .await
        .expect("delete member row");
}

#[then(regex = r#"^removing \"([^\"]+)\" from the group as \"([^\"]+)\" fails with message \"([^\"]+)\"$"#)]
async fn then_removal_fails(world: &mut AppWorld, target: String, actor: String, expected: String) {
    let group_id = world.group_id.expect("group must exist first");
    let actor_id = world.user(&actor).id;
    let target_id = world.user(&target).id;
    let err = world
        .app()
        .policy()
        .authorize_member_removal(group_id, actor_id, target_id)
        .await
        .expect_err("removal should be rejected");
    let message = match err {
        AppError::BadRequest(msg) => msg,
        AppError::Forbidden => "メンバーを削除する権限がありません".to_string(),
        other => panic!("unexpected removal error: {other}"),
    };
    assert_eq!(message, expected);
}

#[when(regex = r#"^\"([^\"]+)\" creates a personal copy of the group trip$"#)]
async fn when_create_personal_copy(world: &mut AppWorld, username: String) {
    let user_id = world.user(&username).id;
    let group_id = world.group_id.expect("group must exist first");
    let group_trip_id = world.group_trip_id.expect("group trip must exist first");
    let trip_id = create_personal_trip_from_group(world.app(), user_id, group_id, group_trip_id)
        .await
        .expect("personal copy");
    world.current_trip = Some(trip_id);
}

#[then(regex = r#"^\"([^\"]+)\" owns a personal trip to \"([^\"]+)\" with (\d+) checklist items$"#)]
async fn then_owns_personal_trip(
    world: &mut AppWorld,
    username: String,
    location: String,
    expected: i64,
) {
    let user_id = world.user(&username).id;
    let trip_id: i64 = sqlx::query_scalar(
        r#"SELECT trip_id FROM trips
           WHERE user_id = ?1 AND location_name = ?2 AND trip_type = 'personal'"#,
    )
    .bind(user_id)
    .bind(&location)
    .fetch_one(&world.app().db)
    .await
    .expect("personal trip row");
    assert_eq!(count_items(world, trip_id).await, expected);
}

#[then(regex = r#"^creating another personal copy as \"([^\"]+)\" fails with message \"([^\"]+)\"$"#)]
async fn then_second_copy_fails(world: &mut AppWorld, username: String, expected: String) {
    let user_id = world.user(&username).id;
    let group_id = world.group_id.expect("group must exist first");
    let group_trip_id = world.group_trip_id.expect("group trip must exist first");
    let err = create_personal_trip_from_group(world.app(), user_id, group_id, group_trip_id)
        .await
        .expect_err("second copy should be rejected");
    match err {
        AppError::BadRequest(msg) => assert_eq!(msg, expected),
        other => panic!("unexpected error: {other}"),
    }
}

#[then(regex = r#"^\"([^\"]+)\" cannot view the group trip$"#)]
async fn then_cannot_view(world: &mut AppWorld, username: String) {
    let user_id = world.user(&username).id;
    let group_trip_id = world.group_trip_id.expect("group trip must exist first");
    let trip = fetch_trip(&world.app().db, group_trip_id)
        .await
        .expect("fetch trip")
        .expect("trip row");
    let visible = world
        .app()
        .policy()
        .can_view_trip(user_id, &trip)
        .await
        .expect("policy check");
    assert!(!visible);
    let denied = world
        .app()
        .policy()
        .require_trip_access(user_id, &trip)
        .await;
    assert!(matches!(denied, Err(AppError::Forbidden)));
}

async fn register_user(world: &mut AppWorld, username: String, email: String, password: String) {
    let created = auth::register_user(world.app(), &username, &email, &password)
        .await
        .expect("register user");
    world.users.insert(username, created);
}

#[allow(clippy::too_many_arguments)]
async fn insert_trip(
    world: &AppWorld,
    user_id: i64,
    location: &str,
    latitude: f64,
    longitude: f64,
    start: &str,
    end: &str,
    trip_type: &str,
    group_id: Option<i64>,
) -> i64 {
    let start: NaiveDate = start.parse().expect("start date");
    let end: NaiveDate = end.parse().expect("end date");
    sqlx::query_scalar(
        r#"INSERT INTO trips (user_id, location_name, latitude, longitude, start_date,
                              end_date, trip_type, group_id, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) RETURNING trip_id"#,
    )
    .bind(user_id)
    .bind(location)
    .bind(latitude)
    .bind(longitude)
    .bind(start)
    .bind(end)
    .bind(trip_type)
    .bind(group_id)
    .bind(Utc::now())
    .fetch_one(&world.app().db)
    .await
    .expect("insert trip")
}

async fn count_items(world: &AppWorld, trip_id: i64) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE trip_id = ?1")
        .bind(trip_id)
        .fetch_one(&world.app().db)
        .await
        .expect("count items")
}

async fn item_names(world: &AppWorld, trip_id: i64) -> Vec<String> {
    sqlx::query_scalar("SELECT item_name FROM items WHERE trip_id = ?1")
        .bind(trip_id)
        .fetch_all(&world.app().db)
        .await
        .expect("item names")
}

#[tokio::main]
async fn main() {
    AppWorld::cucumber()
        .fail_on_skipped()
        .with_default_cli()
        .run("tests/features")
        .await;
}
