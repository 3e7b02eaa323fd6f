use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum_test::TestServer;
use chrono::{DateTime, Duration, Utc};

use suggestd::config::Config;
use suggestd::error::{AppError, AppResult};
use suggestd::models::{Feedback, Item, User};
use suggestd::routes::{create_router, AppState};
use suggestd::services::{RecommendationService, Recommender};
use suggestd::store::cache::{
    self, CacheStore, MemoryCacheStore, Scored, HIDDEN_ITEMS, IGNORE_ITEMS, LATEST_ITEMS,
    OFFLINE_RECOMMEND, POPULAR_ITEMS, USER_NEIGHBORS,
};
use suggestd::store::data::{DataStore, MemoryDataStore};

struct TestEnv {
    server: TestServer,
    cache: Arc<MemoryCacheStore>,
    data: Arc<MemoryDataStore>,
    service: Arc<RecommendationService>,
}

fn test_config() -> Config {
    Config {
        data_url: "mem://".to_string(),
        cache_url: "mem://".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        api_key: String::new(),
        dashboard: false,
        default_n: 10,
        cache_size: 100,
        positive_feedback_types: vec!["star".to_string(), "like".to_string()],
        auto_insert_user: true,
        auto_insert_item: false,
        fallback_recommend: vec!["latest".to_string()],
    }
}

fn create_test_env(config: Config) -> TestEnv {
    let cache = Arc::new(MemoryCacheStore::new());
    let data = Arc::new(MemoryDataStore::new());
    let service = Arc::new(RecommendationService::new(
        cache.clone(),
        data.clone(),
        Arc::new(config),
    ));
    let server = TestServer::new(create_router(AppState {
        service: service.clone(),
    }))
    .unwrap();
    TestEnv {
        server,
        cache,
        data,
        service,
    }
}

fn item_in_categories(id: &str, categories: &[&str]) -> Item {
    Item {
        item_id: id.to_string(),
        is_hidden: false,
        categories: categories.iter().map(|c| c.to_string()).collect(),
        timestamp: Utc::now() - Duration::days(1),
        labels: Vec::new(),
        comment: String::new(),
    }
}

#[tokio::test]
async fn test_offline_hits_fully() {
    let mut config = test_config();
    config.default_n = 3;
    let env = create_test_env(config);
    env.cache
        .set_scores(
            OFFLINE_RECOMMEND,
            "u1",
            vec![
                Scored::new("a", 9.0),
                Scored::new("b", 8.0),
                Scored::new("c", 7.0),
                Scored::new("d", 6.0),
            ],
        )
        .await;

    let response = env
        .server
        .get("/api/recommend/u1")
        .add_query_param("n", 3)
        .await;
    response.assert_status_ok();
    let results: Vec<String> = response.json();
    assert_eq!(results, vec!["a", "b", "c"]);

    let ctx = env
        .service
        .run_pipeline("u1", "", 3, &[Recommender::Offline, Recommender::Latest])
        .await
        .unwrap();
    assert_eq!(ctx.num_from_offline, 3);
    assert_eq!(ctx.num_from_latest, 0);
}

#[tokio::test]
async fn test_offline_partial_latest_fills() {
    let env = create_test_env(test_config());
    env.cache
        .set_scores(OFFLINE_RECOMMEND, "u1", vec![Scored::new("a", 9.0)])
        .await;
    env.cache
        .set_scores(
            LATEST_ITEMS,
            "",
            vec![Scored::new("b", 5.0), Scored::new("c", 4.0)],
        )
        .await;

    let response = env
        .server
        .get("/api/recommend/u1")
        .add_query_param("n", 3)
        .await;
    response.assert_status_ok();
    let results: Vec<String> = response.json();
    assert_eq!(results, vec!["a", "b", "c"]);

    let ctx = env
        .service
        .run_pipeline("u1", "", 3, &[Recommender::Offline, Recommender::Latest])
        .await
        .unwrap();
    assert_eq!(ctx.num_from_offline, 1);
    assert_eq!(ctx.num_from_latest, 2);
    assert_eq!(
        ctx.num_from_offline + ctx.num_from_latest,
        ctx.results.len()
    );
}

#[tokio::test]
async fn test_hidden_items_are_filtered() {
    let mut config = test_config();
    config.fallback_recommend = vec!["popular".to_string()];
    let env = create_test_env(config);
    env.cache
        .set_scores(
            OFFLINE_RECOMMEND,
            "u1",
            vec![
                Scored::new("a", 9.0),
                Scored::new("b", 8.0),
                Scored::new("c", 7.0),
            ],
        )
        .await;
    env.cache.set_int(HIDDEN_ITEMS, "b", 1).await.unwrap();
    env.cache
        .set_scores(POPULAR_ITEMS, "", vec![Scored::new("d", 1.0)])
        .await;

    let response = env
        .server
        .get("/api/recommend/u1")
        .add_query_param("n", 3)
        .await;
    response.assert_status_ok();
    let results: Vec<String> = response.json();
    assert_eq!(results, vec!["a", "c", "d"]);
}

#[tokio::test]
async fn test_expired_ignore_entries_stay_excluded() {
    let mut config = test_config();
    config.fallback_recommend = vec!["popular".to_string()];
    let env = create_test_env(config);
    let past_expiry = (Utc::now().timestamp() - 10) as f32;
    env.cache
        .append_scores(IGNORE_ITEMS, "u1", &[Scored::new("a", past_expiry)])
        .await
        .unwrap();
    env.cache
        .set_scores(
            OFFLINE_RECOMMEND,
            "u1",
            vec![Scored::new("a", 9.0), Scored::new("b", 8.0)],
        )
        .await;
    env.cache
        .set_scores(POPULAR_ITEMS, "", vec![Scored::new("c", 1.0)])
        .await;

    let response = env
        .server
        .get("/api/recommend/u1")
        .add_query_param("n", 2)
        .await;
    response.assert_status_ok();
    let results: Vec<String> = response.json();
    assert_eq!(results, vec!["b", "c"]);
}

#[tokio::test]
async fn test_future_ignore_entries_are_not_excluded() {
    let env = create_test_env(test_config());
    let future_expiry = (Utc::now().timestamp() + 3600) as f32;
    env.cache
        .append_scores(IGNORE_ITEMS, "u1", &[Scored::new("a", future_expiry)])
        .await
        .unwrap();
    env.cache
        .set_scores(OFFLINE_RECOMMEND, "u1", vec![Scored::new("a", 9.0)])
        .await;

    let response = env
        .server
        .get("/api/recommend/u1")
        .add_query_param("n", 1)
        .await;
    response.assert_status_ok();
    let results: Vec<String> = response.json();
    assert_eq!(results, vec!["a"]);
}

#[tokio::test]
async fn test_user_based_respects_category() {
    let mut config = test_config();
    config.fallback_recommend = vec!["user_based".to_string()];
    let env = create_test_env(config);
    env.cache
        .set_scores(USER_NEIGHBORS, "u1", vec![Scored::new("v", 0.7)])
        .await;
    env.data
        .batch_insert_users(&[User::new("u1"), User::new("v")])
        .await
        .unwrap();
    env.data
        .batch_insert_items(&[
            item_in_categories("x", &["books"]),
            item_in_categories("y", &["music"]),
        ])
        .await
        .unwrap();
    let earlier = Utc::now() - Duration::hours(1);
    env.data
        .batch_insert_feedback(
            vec![
                Feedback::new("like", "v", "x", earlier),
                Feedback::new("like", "v", "y", earlier),
            ],
            false,
            false,
            false,
        )
        .await
        .unwrap();

    let response = env
        .server
        .get("/api/recommend/u1/books")
        .add_query_param("n", 5)
        .await;
    response.assert_status_ok();
    let results: Vec<String> = response.json();
    assert_eq!(results, vec!["x"]);
}

#[tokio::test]
async fn test_write_back_excludes_returned_items() {
    let mut config = test_config();
    config.fallback_recommend = vec!["popular".to_string()];
    let env = create_test_env(config);
    env.data.batch_insert_users(&[User::new("u1")]).await.unwrap();
    env.data
        .batch_insert_items(&[item_in_categories("a", &[]), item_in_categories("b", &[])])
        .await
        .unwrap();
    env.cache
        .set_scores(
            POPULAR_ITEMS,
            "",
            vec![Scored::new("a", 1.0), Scored::new("b", 1.0)],
        )
        .await;

    let response = env
        .server
        .get("/api/recommend/u1")
        .add_query_param("n", 2)
        .add_query_param("write-back-type", "impression")
        .add_query_param("write-back-delay", 0)
        .await;
    response.assert_status_ok();
    let results: Vec<String> = response.json();
    assert_eq!(results, vec!["a", "b"]);

    // synthetic feedback rows landed in the data store
    for item_id in ["a", "b"] {
        let rows = env
            .data
            .get_user_item_feedback("u1", item_id, &["impression".to_string()])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    // and were mirrored into the ignore list with an expiry around now
    let ignored = env
        .cache
        .get_scores(IGNORE_ITEMS, "u1", 0, -1)
        .await
        .unwrap();
    assert_eq!(ignored.len(), 2);
    let now = Utc::now().timestamp() as f32;
    for entry in &ignored {
        assert!((entry.score - now).abs() < 5.0);
    }

    // a zero-delay write-back makes an immediate retry come up empty
    let response = env
        .server
        .get("/api/recommend/u1")
        .add_query_param("n", 2)
        .await;
    response.assert_status_ok();
    let results: Vec<String> = response.json();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_write_back_with_delay_keeps_results_stable() {
    let mut config = test_config();
    config.fallback_recommend = vec!["popular".to_string()];
    let env = create_test_env(config);
    env.data.batch_insert_users(&[User::new("u1")]).await.unwrap();
    env.cache
        .set_scores(
            POPULAR_ITEMS,
            "",
            vec![Scored::new("a", 1.0), Scored::new("b", 1.0)],
        )
        .await;

    let response = env
        .server
        .get("/api/recommend/u1")
        .add_query_param("n", 2)
        .add_query_param("write-back-type", "read")
        .add_query_param("write-back-delay", 30)
        .await;
    response.assert_status_ok();
    let first: Vec<String> = response.json();
    assert_eq!(first, vec!["a", "b"]);

    // the expiry lies in the future, so the entries are not excluded yet
    let response = env
        .server
        .get("/api/recommend/u1")
        .add_query_param("n", 2)
        .await;
    response.assert_status_ok();
    let second: Vec<String> = response.json();
    assert_eq!(second, first);
}

#[tokio::test]
async fn test_n_zero_returns_empty_and_runs_no_stage() {
    let env = create_test_env(test_config());
    env.cache
        .set_scores(OFFLINE_RECOMMEND, "u1", vec![Scored::new("a", 9.0)])
        .await;

    let response = env
        .server
        .get("/api/recommend/u1")
        .add_query_param("n", 0)
        .await;
    response.assert_status_ok();
    let results: Vec<String> = response.json();
    assert!(results.is_empty());

    let ctx = env
        .service
        .run_pipeline("u1", "", 0, &[Recommender::Offline, Recommender::Latest])
        .await
        .unwrap();
    assert!(ctx.results.is_empty());
    assert_eq!(ctx.num_from_offline, 0);
    assert_eq!(ctx.num_from_latest, 0);
}

#[tokio::test]
async fn test_offset_beyond_results_returns_empty() {
    let env = create_test_env(test_config());
    env.cache
        .set_scores(OFFLINE_RECOMMEND, "u1", vec![Scored::new("a", 9.0)])
        .await;

    let response = env
        .server
        .get("/api/recommend/u1")
        .add_query_param("n", 3)
        .add_query_param("offset", 10)
        .await;
    response.assert_status_ok();
    let results: Vec<String> = response.json();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_offset_skips_leading_results() {
    let env = create_test_env(test_config());
    env.cache
        .set_scores(
            OFFLINE_RECOMMEND,
            "u1",
            vec![
                Scored::new("a", 9.0),
                Scored::new("b", 8.0),
                Scored::new("c", 7.0),
                Scored::new("d", 6.0),
            ],
        )
        .await;

    let response = env
        .server
        .get("/api/recommend/u1")
        .add_query_param("n", 2)
        .add_query_param("offset", 1)
        .await;
    response.assert_status_ok();
    let results: Vec<String> = response.json();
    assert_eq!(results, vec!["b", "c"]);
}

#[tokio::test]
async fn test_unknown_fallback_name_returns_500() {
    let mut config = test_config();
    config.fallback_recommend = vec!["bogus".to_string()];
    let env = create_test_env(config);

    let response = env.server.get("/api/recommend/u1").await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_empty_history_stages_succeed() {
    let mut config = test_config();
    config.fallback_recommend = vec!["item_based".to_string(), "user_based".to_string()];
    let env = create_test_env(config);

    let response = env
        .server
        .get("/api/recommend/u1")
        .add_query_param("n", 3)
        .await;
    response.assert_status_ok();
    let results: Vec<String> = response.json();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_no_duplicates_across_stages() {
    let env = create_test_env(test_config());
    env.cache
        .set_scores(
            OFFLINE_RECOMMEND,
            "u1",
            vec![Scored::new("a", 9.0), Scored::new("b", 8.0)],
        )
        .await;
    // the latest list repeats ids the offline stage already produced
    env.cache
        .set_scores(
            LATEST_ITEMS,
            "",
            vec![
                Scored::new("a", 5.0),
                Scored::new("b", 4.0),
                Scored::new("c", 3.0),
            ],
        )
        .await;

    let ctx = env
        .service
        .run_pipeline("u1", "", 4, &[Recommender::Offline, Recommender::Latest])
        .await
        .unwrap();
    assert_eq!(ctx.results, vec!["a", "b", "c"]);
    assert_eq!(ctx.num_from_offline, 2);
    assert_eq!(ctx.num_from_latest, 1);
}

#[tokio::test]
async fn test_rerun_is_deterministic() {
    let mut config = test_config();
    config.fallback_recommend = vec!["item_based".to_string()];
    let env = create_test_env(config);
    env.data.batch_insert_users(&[User::new("u1")]).await.unwrap();
    env.data
        .batch_insert_items(&[item_in_categories("seed", &[])])
        .await
        .unwrap();
    env.data
        .batch_insert_feedback(
            vec![Feedback::new(
                "like",
                "u1",
                "seed",
                Utc::now() - Duration::hours(1),
            )],
            false,
            false,
            false,
        )
        .await
        .unwrap();
    env.cache
        .set_scores(
            cache::ITEM_NEIGHBORS,
            "seed",
            vec![
                Scored::new("n1", 0.9),
                Scored::new("n2", 0.9),
                Scored::new("n3", 0.5),
            ],
        )
        .await;

    let first = env
        .service
        .recommend(
            "u1",
            "",
            3,
            &[Recommender::Offline, Recommender::ItemBased],
        )
        .await
        .unwrap();
    let second = env
        .service
        .recommend(
            "u1",
            "",
            3,
            &[Recommender::Offline, Recommender::ItemBased],
        )
        .await
        .unwrap();
    // map aggregation drains in descending score with lexicographic ties
    assert_eq!(first, vec!["n1", "n2", "n3"]);
    assert_eq!(first, second);
}

/// Cache store whose membership checks always fail, for exercising the
/// fail-open hidden filter.
struct BrokenExistsCacheStore {
    inner: MemoryCacheStore,
}

#[async_trait]
impl CacheStore for BrokenExistsCacheStore {
    async fn get_scores(
        &self,
        prefix: &str,
        name: &str,
        begin: isize,
        end: isize,
    ) -> AppResult<Vec<Scored>> {
        self.inner.get_scores(prefix, name, begin, end).await
    }

    async fn exists(&self, _prefix: &str, _names: &[String]) -> AppResult<Vec<i32>> {
        Err(AppError::Internal("exists is broken".to_string()))
    }

    async fn append_scores(&self, prefix: &str, name: &str, entries: &[Scored]) -> AppResult<()> {
        self.inner.append_scores(prefix, name, entries).await
    }

    async fn set_int(&self, prefix: &str, name: &str, value: i64) -> AppResult<()> {
        self.inner.set_int(prefix, name, value).await
    }

    async fn delete(&self, prefix: &str, name: &str) -> AppResult<()> {
        self.inner.delete(prefix, name).await
    }

    async fn set_time(&self, prefix: &str, name: &str, time: DateTime<Utc>) -> AppResult<()> {
        self.inner.set_time(prefix, name, time).await
    }

    async fn get_time(&self, prefix: &str, name: &str) -> AppResult<Option<DateTime<Utc>>> {
        self.inner.get_time(prefix, name).await
    }
}

#[tokio::test]
async fn test_hidden_filter_fails_open_on_cache_error() {
    let broken = BrokenExistsCacheStore {
        inner: MemoryCacheStore::new(),
    };
    broken
        .inner
        .set_scores(
            OFFLINE_RECOMMEND,
            "u1",
            vec![Scored::new("a", 9.0), Scored::new("b", 8.0)],
        )
        .await;
    // flagged hidden, but the failing check must not drop it
    broken.inner.set_int(HIDDEN_ITEMS, "b", 1).await.unwrap();

    let service = RecommendationService::new(
        Arc::new(broken),
        Arc::new(MemoryDataStore::new()),
        Arc::new(test_config()),
    );
    let results = service
        .recommend("u1", "", 2, &[Recommender::Offline])
        .await
        .unwrap();
    assert_eq!(results, vec!["a", "b"]);
}

#[tokio::test]
async fn test_category_scores_use_suffixed_lists() {
    let env = create_test_env(test_config());
    env.cache
        .set_scores(OFFLINE_RECOMMEND, "u1", vec![Scored::new("global", 1.0)])
        .await;
    env.cache
        .set_scores(
            OFFLINE_RECOMMEND,
            "u1/books",
            vec![Scored::new("book-1", 1.0)],
        )
        .await;

    let global = env
        .service
        .recommend("u1", "", 5, &[Recommender::Offline])
        .await
        .unwrap();
    assert_eq!(global, vec!["global"]);

    let books = env
        .service
        .recommend("u1", "books", 5, &[Recommender::Offline])
        .await
        .unwrap();
    assert_eq!(books, vec!["book-1"]);
}

#[tokio::test]
async fn test_collaborative_stage_reads_its_own_keyspace() {
    let mut config = test_config();
    config.fallback_recommend = vec!["collaborative".to_string()];
    let env = create_test_env(config);
    env.cache
        .set_scores(
            cache::COLLABORATIVE_RECOMMEND,
            "u1",
            vec![Scored::new("c1", 2.0), Scored::new("c2", 1.0)],
        )
        .await;

    let response = env
        .server
        .get("/api/recommend/u1")
        .add_query_param("n", 2)
        .await;
    response.assert_status_ok();
    let results: Vec<String> = response.json();
    assert_eq!(results, vec!["c1", "c2"]);

    let ctx = env
        .service
        .run_pipeline(
            "u1",
            "",
            2,
            &[Recommender::Offline, Recommender::Collaborative],
        )
        .await
        .unwrap();
    assert_eq!(ctx.num_from_collaborative, 2);
}

#[tokio::test]
async fn test_user_feedback_seeds_exclusions() {
    let mut config = test_config();
    config.fallback_recommend = vec!["latest".to_string()];
    let env = create_test_env(config);
    env.data.batch_insert_users(&[User::new("u1")]).await.unwrap();
    env.data
        .batch_insert_items(&[item_in_categories("seen", &[])])
        .await
        .unwrap();
    env.data
        .batch_insert_feedback(
            vec![Feedback::new(
                "like",
                "u1",
                "seen",
                Utc::now() - Duration::hours(2),
            )],
            false,
            false,
            false,
        )
        .await
        .unwrap();
    env.cache
        .set_scores(
            LATEST_ITEMS,
            "",
            vec![Scored::new("seen", 5.0), Scored::new("fresh", 4.0)],
        )
        .await;

    let response = env
        .server
        .get("/api/recommend/u1")
        .add_query_param("n", 2)
        .await;
    response.assert_status_ok();
    let results: Vec<String> = response.json();
    assert_eq!(results, vec!["fresh"]);
}
