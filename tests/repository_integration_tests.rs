//! Postgres-backed repository tests. They need a reachable `DATABASE_URL` and are
//! ignored by default: `cargo test -- --ignored`.

use chrono::{Duration, Utc};
use civic_issues::{
    analytics::DateWindow,
    lifecycle::{IssueChanges, StatusTransition},
    models::{
        AttachmentKind, IssueCategory, IssuePriority, IssueStatus, NewAttachment, NewComment,
        NewIssue, NewUser, Role, UpdateIssueRequest, User, UserChanges,
    },
    query::{IssueFilter, SortField, SortOrder, UserFilter},
    repository::{PostgresRepository, Repository, RepositoryError},
};
use sqlx::PgPool;
use uuid::Uuid;

// --- Test Context and Setup ---

struct DbTestContext {
    pool: PgPool,
}

impl DbTestContext {
    async fn setup() -> Self {
        dotenv::dotenv().ok();

        let db_url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set to run integration tests");

        let pool = PgPool::connect(&db_url)
            .await
            .expect("Failed to connect to database for integration tests.");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run database migrations.");

        DbTestContext { pool }
    }

    fn repository(&self) -> PostgresRepository {
        PostgresRepository::new(self.pool.clone())
    }
}

// --- Test Data Helpers ---

/// Every test works on its own rows, tagged with a random marker.
fn marker() -> String {
    Uuid::new_v4().simple().to_string()
}

async fn create_test_user(repo: &PostgresRepository, tag: &str, role: Role) -> User {
    repo.create_user(NewUser {
        email: format!("{tag}-{}@test.com", marker()),
        password_hash: "$2b$04$not-a-real-hash".to_string(),
        name: Some(format!("{tag} user")),
        role,
    })
    .await
    .expect("Failed to create test user")
}

fn new_issue(reporter: &User, title: &str) -> NewIssue {
    NewIssue {
        title: title.to_string(),
        description: "Integration test issue description".to_string(),
        category: IssueCategory::Pothole,
        priority: IssuePriority::High,
        severity: 4,
        location: "Test Avenue 1".to_string(),
        latitude: Some(52.5),
        longitude: None,
        reporter_id: reporter.id,
    }
}

fn search_filter(term: &str) -> IssueFilter {
    IssueFilter {
        search: Some(term.to_lowercase()),
        ..IssueFilter::recent(50)
    }
}

// --- Users ---

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_user_roundtrip_and_unique_email() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();

    let user = create_test_user(&repo, "citizen", Role::Citizen).await;

    let found = repo.find_user_by_email(&user.email).await.unwrap().unwrap();
    assert_eq!(found.id, user.id);
    assert_eq!(found.role, Role::Citizen);

    let duplicate = repo
        .create_user(NewUser {
            email: user.email.clone(),
            password_hash: "x".to_string(),
            name: None,
            role: Role::Admin,
        })
        .await;
    assert!(matches!(duplicate, Err(RepositoryError::Conflict(_))));

    let updated = repo
        .update_user(
            user.id,
            UserChanges {
                role: Some(Role::Admin),
                ..UserChanges::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.role, Role::Admin);
    assert_eq!(updated.name, user.name);

    assert!(repo.set_password(user.id, "new-hash").await.unwrap());
    assert!(!repo.set_password(Uuid::new_v4(), "new-hash").await.unwrap());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_list_users_counts_and_search() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let tag = marker();

    let reporter = create_test_user(&repo, &tag, Role::Citizen).await;
    let crew = create_test_user(&repo, &tag, Role::Admin).await;
    let issue = repo.create_issue(new_issue(&reporter, "Counted issue")).await.unwrap();
    repo.assign_issue(issue.issue.id, crew.id, &crew).await.unwrap();

    let (users, total) = repo
        .list_users(&UserFilter {
            role: None,
            search: Some(tag.clone()),
            page: 1,
            limit: 10,
        })
        .await
        .unwrap();

    assert_eq!(total, 2);
    let reporter_row = users.iter().find(|u| u.user.id == reporter.id).unwrap();
    assert_eq!(reporter_row.issue_counts.reported_issues, 1);
    let crew_row = users.iter().find(|u| u.user.id == crew.id).unwrap();
    assert_eq!(crew_row.issue_counts.assigned_issues, 1);

    let detail = repo.user_detail(reporter.id).await.unwrap().unwrap();
    assert_eq!(detail.reported_issues.len(), 1);

    let stats = repo
        .user_stats(crew.id, Utc::now() - Duration::days(30))
        .await
        .unwrap();
    assert_eq!(stats.total_assigned, 1);
    assert_eq!(stats.assigned_this_month, 1);
    assert_eq!(stats.resolved_as_assignee, 0);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_delete_user_with_issues_is_refused() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();

    let reporter = create_test_user(&repo, "reporter", Role::Citizen).await;
    repo.create_issue(new_issue(&reporter, "Blocking issue")).await.unwrap();

    assert_eq!(repo.count_user_issues(reporter.id).await.unwrap(), 1);
    let result = repo.delete_user(reporter.id).await;
    assert!(matches!(result, Err(RepositoryError::Referenced(_))));

    let loner = create_test_user(&repo, "loner", Role::Citizen).await;
    assert!(repo.delete_user(loner.id).await.unwrap());
    assert!(repo.get_user(loner.id).await.unwrap().is_none());
}

// --- Issues ---

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_create_issue_writes_initial_history() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let reporter = create_test_user(&repo, "reporter", Role::Citizen).await;

    let view = repo.create_issue(new_issue(&reporter, "Fresh pothole")).await.unwrap();

    assert_eq!(view.issue.status, IssueStatus::Submitted);
    assert_eq!(view.reporter.id, reporter.id);
    assert!(view.assignee.is_none());
    assert_eq!(view.comment_count, 0);

    let history = repo.status_history(view.issue.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, IssueStatus::Submitted);
    assert_eq!(history[0].comment.as_deref(), Some("Issue created"));
    assert_eq!(history[0].changed_by.id, reporter.id);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_status_change_and_assignment() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let reporter = create_test_user(&repo, "reporter", Role::Citizen).await;
    let admin = create_test_user(&repo, "admin", Role::Admin).await;
    let id = repo.create_issue(new_issue(&reporter, "Lifecycle issue")).await.unwrap().issue.id;

    let assigned = repo.assign_issue(id, admin.id, &admin).await.unwrap().unwrap();
    assert_eq!(assigned.issue.status, IssueStatus::Assigned);
    assert_eq!(assigned.assignee.as_ref().map(|a| a.id), Some(admin.id));

    let now = Utc::now();
    let resolved = repo
        .change_status(id, admin.id, &StatusTransition::new(IssueStatus::Resolved, None, now))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolved.issue.status, IssueStatus::Resolved);
    let stamped = resolved.issue.resolved_at.expect("resolvedAt set");

    let closed = repo
        .change_status(
            id,
            admin.id,
            &StatusTransition::new(IssueStatus::Closed, Some("Done".to_string()), Utc::now()),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(closed.issue.resolved_at, Some(stamped));

    let history = repo.status_history(id).await.unwrap();
    let statuses: Vec<IssueStatus> = history.iter().map(|h| h.status).collect();
    assert_eq!(
        statuses,
        vec![
            IssueStatus::Submitted,
            IssueStatus::Assigned,
            IssueStatus::Resolved,
            IssueStatus::Closed
        ]
    );
    assert_eq!(history[3].comment.as_deref(), Some("Done"));

    let missing = repo
        .change_status(Uuid::new_v4(), admin.id, &StatusTransition::new(IssueStatus::Closed, None, now))
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_resolution_times_come_from_the_database_clock() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let reporter = create_test_user(&repo, "reporter", Role::Citizen).await;
    let admin = create_test_user(&repo, "admin", Role::Admin).await;
    let created = repo.create_issue(new_issue(&reporter, "Clocked issue")).await.unwrap().issue;

    // An application clock running a day behind must not leak into stored times.
    let skewed = Utc::now() - Duration::days(1);
    let resolved = repo
        .change_status(
            created.id,
            admin.id,
            &StatusTransition::new(IssueStatus::Resolved, None, skewed),
        )
        .await
        .unwrap()
        .unwrap();
    let resolved_at = resolved.issue.resolved_at.expect("resolvedAt set");
    assert!(resolved_at >= created.created_at);

    let history = repo.status_history(created.id).await.unwrap();
    assert!(history.iter().all(|h| h.created_at >= created.created_at));

    let edited = repo
        .update_issue(
            created.id,
            IssueChanges::from_request(
                UpdateIssueRequest {
                    status: Some(IssueStatus::Resolved),
                    ..UpdateIssueRequest::default()
                },
                Role::Admin,
                skewed,
            )
            .unwrap(),
        )
        .await
        .unwrap()
        .unwrap();
    assert!(edited.issue.resolved_at.unwrap() >= resolved_at);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_update_issue_applies_only_given_fields() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let reporter = create_test_user(&repo, "reporter", Role::Citizen).await;
    let id = repo.create_issue(new_issue(&reporter, "Editable issue")).await.unwrap().issue.id;

    let updated = repo
        .update_issue(
            id,
            IssueChanges {
                title: Some("Edited title".to_string()),
                severity: Some(1),
                ..IssueChanges::default()
            },
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(updated.issue.title, "Edited title");
    assert_eq!(updated.issue.severity, 1);
    assert_eq!(updated.issue.location, "Test Avenue 1");
    assert_eq!(repo.status_history(id).await.unwrap().len(), 1);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_list_issues_filters_and_pages() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let tag = marker();
    let reporter = create_test_user(&repo, "reporter", Role::Citizen).await;
    let other = create_test_user(&repo, "other", Role::Citizen).await;

    for n in 0..3 {
        repo.create_issue(new_issue(&reporter, &format!("{tag} mine {n}"))).await.unwrap();
    }
    repo.create_issue(new_issue(&other, &format!("{tag} theirs"))).await.unwrap();

    let (page, total) = repo
        .list_issues(&IssueFilter {
            limit: 2,
            ..search_filter(&tag)
        })
        .await
        .unwrap();
    assert_eq!(total, 4);
    assert_eq!(page.len(), 2);

    let (mine, total) = repo
        .list_issues(&IssueFilter {
            reporter_id: Some(reporter.id),
            sort_by: SortField::CreatedAt,
            sort_order: SortOrder::Asc,
            ..search_filter(&tag)
        })
        .await
        .unwrap();
    assert_eq!(total, 3);
    let titles: Vec<&str> = mine.iter().map(|v| v.issue.title.as_str()).collect();
    assert_eq!(
        titles,
        vec![
            format!("{tag} mine 0"),
            format!("{tag} mine 1"),
            format!("{tag} mine 2")
        ]
    );

    let (none, total) = repo
        .list_issues(&IssueFilter {
            status: Some(IssueStatus::Closed),
            ..search_filter(&tag)
        })
        .await
        .unwrap();
    assert!(none.is_empty());
    assert_eq!(total, 0);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_search_matches_like_wildcards_literally() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let tag = marker();
    let reporter = create_test_user(&repo, &tag, Role::Citizen).await;

    repo.create_issue(new_issue(&reporter, "Leaning lamp post")).await.unwrap();
    repo.create_issue(new_issue(&reporter, "Sign 50% faded")).await.unwrap();

    let count = |term: &str| {
        let filter = IssueFilter {
            reporter_id: Some(reporter.id),
            ..search_filter(term)
        };
        let repo = &repo;
        async move { repo.list_issues(&filter).await.unwrap().1 }
    };
    assert_eq!(count("%").await, 1);
    assert_eq!(count("50%").await, 1);
    assert_eq!(count("_").await, 0);
    assert_eq!(count("lamp%post").await, 0);
    assert_eq!(count("lamp post").await, 1);

    let users = |term: String| UserFilter {
        role: None,
        search: Some(term),
        page: 1,
        limit: 10,
    };
    let (_, wildcard) = repo.list_users(&users(format!("{tag}_user"))).await.unwrap();
    assert_eq!(wildcard, 0);
    let (_, wildcard) = repo.list_users(&users(format!("{tag}%user"))).await.unwrap();
    assert_eq!(wildcard, 0);
    let (_, literal) = repo.list_users(&users(format!("{tag} user"))).await.unwrap();
    assert_eq!(literal, 1);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_comments_attachments_and_cascade() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let reporter = create_test_user(&repo, "reporter", Role::Citizen).await;
    let admin = create_test_user(&repo, "admin", Role::Admin).await;
    let id = repo.create_issue(new_issue(&reporter, "Commented issue")).await.unwrap().issue.id;

    repo.add_comment(NewComment {
        issue_id: id,
        author_id: reporter.id,
        content: "Still broken".to_string(),
        is_internal: false,
    })
    .await
    .unwrap();
    let internal = repo
        .add_comment(NewComment {
            issue_id: id,
            author_id: admin.id,
            content: "Crew scheduled".to_string(),
            is_internal: true,
        })
        .await
        .unwrap();
    assert_eq!(internal.author.role, Role::Admin);

    let attachment = repo
        .create_attachment(NewAttachment {
            issue_id: id,
            filename: format!("{}.png", Uuid::new_v4()),
            original_name: "photo.png".to_string(),
            mime_type: "image/png".to_string(),
            size: 10,
            url: "/uploads/images/x.png".to_string(),
            kind: AttachmentKind::Image,
        })
        .await
        .unwrap();

    let public = repo.issue_detail(id, false).await.unwrap().unwrap();
    assert_eq!(public.comments.len(), 1);
    assert_eq!(public.view.attachments.len(), 1);
    let full = repo.issue_detail(id, true).await.unwrap().unwrap();
    assert_eq!(full.comments.len(), 2);
    assert_eq!(full.view.comment_count, 2);

    // A user referenced only by a comment cannot be removed either.
    assert!(matches!(
        repo.delete_user(admin.id).await,
        Err(RepositoryError::Referenced(_))
    ));

    assert!(repo.delete_issue(id).await.unwrap());
    assert!(repo.find_issue(id).await.unwrap().is_none());
    assert!(repo.find_attachment(attachment.id).await.unwrap().is_none());
    assert!(repo.status_history(id).await.unwrap().is_empty());
    assert!(!repo.delete_issue(id).await.unwrap());
}

// --- Analytics ---

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_analytics_facts() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let reporter = create_test_user(&repo, "reporter", Role::Citizen).await;
    let admin = create_test_user(&repo, "admin", Role::Admin).await;
    let started = Utc::now() - Duration::seconds(1);

    let before = repo.issue_totals().await.unwrap();
    let id = repo.create_issue(new_issue(&reporter, "Measured issue")).await.unwrap().issue.id;
    repo.assign_issue(id, admin.id, &admin).await.unwrap();
    repo.change_status(
        id,
        admin.id,
        &StatusTransition::new(IssueStatus::Resolved, None, Utc::now()),
    )
    .await
    .unwrap();

    let after = repo.issue_totals().await.unwrap();
    assert!(after.total > before.total);

    let facts = repo
        .issue_facts(DateWindow {
            from: started,
            to: None,
        })
        .await
        .unwrap();
    let mine = facts
        .iter()
        .find(|f| f.status == IssueStatus::Resolved && f.priority == IssuePriority::High)
        .expect("facts include the new issue");
    assert!(mine.first_response_at.is_some());
    assert!(mine.resolved_at.is_some());

    let resolved = repo.resolved_facts(started).await.unwrap();
    assert!(resolved.iter().all(|f| f.status == IssueStatus::Resolved));
    assert!(!resolved.is_empty());
}
