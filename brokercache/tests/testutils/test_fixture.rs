//! Test fixture for brokercache integration tests
//!
//! Sample mapping:
//! - `shop.ProductGroup` (pk `id`, `name`) with a lazy `articles` collection
//! - `shop.Article` (pk `id`, `name`, `group_id`) with a lazy `group` reference
//! - `shop.Book` extends `shop.Article` and adds `isbn`
//! - `people.Person` (pk `id`, `name`, `friend_id`) with an eager `friend`
//!   reference, so friends form cycles
//! - `values.Currency` (pk `code`), used for package exclusion

use brokercache::cache::cache_config::IMPL_DEFAULT;
use brokercache::{
    BrokerConfig, BrokerFactory, CacheDescriptor, ClassDescriptor, CollectionDescriptor,
    CollectionKind, ConnectionDescriptor, DescriptorRepository, Identity, InMemoryStore, ObjectStore,
    PBKey, PersistenceBroker, PersistenceResult, ReferenceDescriptor, Row, TierConfig, Value,
};
use std::sync::Arc;

use super::hooked_store::HookedStore;

pub const ALIAS: &str = "main";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// How the fixture's mapping is built
#[derive(Debug, Clone)]
pub struct FixtureOptions {
    pub connection_cache: CacheDescriptor,
    pub config: BrokerConfig,
    pub articles_kind: CollectionKind,
    /// Overrides the connection cache for `shop.Article`
    pub article_cache: Option<CacheDescriptor>,
}

impl Default for FixtureOptions {
    fn default() -> Self {
        Self {
            connection_cache: CacheDescriptor::new(IMPL_DEFAULT),
            config: BrokerConfig::default(),
            articles_kind: CollectionKind::List,
            article_cache: None,
        }
    }
}

impl FixtureOptions {
    pub fn with_cache(implementation: &str, config: TierConfig) -> Self {
        Self {
            connection_cache: CacheDescriptor::new(implementation).with_config(config),
            ..Self::default()
        }
    }
}

/// Repository, store and factory for one test
pub struct TestFixture {
    pub repository: Arc<DescriptorRepository>,
    pub store: Arc<InMemoryStore>,
    pub factory: Arc<BrokerFactory>,
}

impl TestFixture {
    /// Fixture with the default cache tier on the connection
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_options(FixtureOptions::default())
    }

    pub fn with_options(options: FixtureOptions) -> Result<Self, Box<dyn std::error::Error>> {
        init_logging();
        let repository = Arc::new(sample_repository(&options));
        let store = Arc::new(InMemoryStore::new(Arc::clone(&repository)));
        let factory = BrokerFactory::new(
            Arc::clone(&repository),
            store.clone() as Arc<dyn ObjectStore>,
            options.config,
        )?;
        Ok(Self {
            repository,
            store,
            factory,
        })
    }

    /// Fixture whose factory reads through a [`HookedStore`]; seeding still
    /// goes to the in-memory store underneath
    pub fn hooked(options: FixtureOptions) -> Result<(Self, Arc<HookedStore>), Box<dyn std::error::Error>> {
        init_logging();
        let repository = Arc::new(sample_repository(&options));
        let store = Arc::new(InMemoryStore::new(Arc::clone(&repository)));
        let hooked = HookedStore::new(store.clone());
        let factory = BrokerFactory::new(
            Arc::clone(&repository),
            hooked.clone() as Arc<dyn ObjectStore>,
            options.config,
        )?;
        let fixture = Self {
            repository,
            store,
            factory,
        };
        Ok((fixture, hooked))
    }

    pub fn broker(&self) -> Arc<PersistenceBroker> {
        self.factory
            .create_broker(PBKey::new(ALIAS))
            .expect("Failed to create broker")
    }

    pub fn managed_broker(&self) -> Arc<PersistenceBroker> {
        self.factory
            .create_managed_broker(PBKey::new(ALIAS))
            .expect("Failed to create managed broker")
    }

    pub fn identity(&self, class: &str, pk: i64) -> Identity {
        Identity::new(
            class,
            self.repository.top_level_class(&class.into()),
            vec![Value::Int(pk)],
        )
    }

    /// Group 1 with articles 10, 11 and book 12; group 2 without articles
    pub fn seed_shop(&self) -> PersistenceResult<()> {
        self.store.insert(Row::new("shop.ProductGroup").with("id", 1).with("name", "Stationery"))?;
        self.store.insert(Row::new("shop.ProductGroup").with("id", 2).with("name", "Empty"))?;
        self.store.insert(
            Row::new("shop.Article")
                .with("id", 10)
                .with("name", "Pen")
                .with("group_id", 1),
        )?;
        self.store.insert(
            Row::new("shop.Article")
                .with("id", 11)
                .with("name", "Ink")
                .with("group_id", 1),
        )?;
        self.store.insert(
            Row::new("shop.Book")
                .with("id", 12)
                .with("name", "Calligraphy")
                .with("group_id", 1)
                .with("isbn", "978-0"),
        )?;
        self.store.reset_counters();
        Ok(())
    }

    /// Ada and Bob are each other's friend, Cyd has none
    pub fn seed_people(&self) -> PersistenceResult<()> {
        self.store.insert(
            Row::new("people.Person")
                .with("id", 1)
                .with("name", "Ada")
                .with("friend_id", 2),
        )?;
        self.store.insert(
            Row::new("people.Person")
                .with("id", 2)
                .with("name", "Bob")
                .with("friend_id", 1),
        )?;
        self.store.insert(Row::new("people.Person").with("id", 3).with("name", "Cyd"))?;
        self.store.reset_counters();
        Ok(())
    }

    pub fn seed_currencies(&self) -> PersistenceResult<()> {
        self.store.insert(Row::new("values.Currency").with("code", 978).with("name", "Euro"))?;
        self.store.reset_counters();
        Ok(())
    }
}

fn sample_repository(options: &FixtureOptions) -> DescriptorRepository {
    let mut repo = DescriptorRepository::new();
    repo.add_connection(ConnectionDescriptor::new(ALIAS).with_cache(options.connection_cache.clone()));

    repo.add_class(
        ClassDescriptor::new("shop.ProductGroup")
            .with_pk("id")
            .with_field("name")
            .with_collection(
                CollectionDescriptor::new("articles", "shop.Article", &["group_id"])
                    .lazy()
                    .with_kind(options.articles_kind),
            )
            .with_proxy_interface("shop.ProductGroupIF"),
    );

    let group = ReferenceDescriptor::new("group", "shop.ProductGroup", &["group_id"]).lazy();
    let mut article = ClassDescriptor::new("shop.Article")
        .with_pk("id")
        .with_field("name")
        .with_field("group_id")
        .with_reference(group.clone())
        .with_proxy_interface("shop.ArticleIF");
    if let Some(cache) = &options.article_cache {
        article = article.with_cache(cache.clone());
    }
    repo.add_class(article);

    let mut book = ClassDescriptor::new("shop.Book")
        .extends("shop.Article")
        .with_pk("id")
        .with_field("name")
        .with_field("group_id")
        .with_field("isbn")
        .with_reference(group)
        .with_proxy_interface("shop.ArticleIF")
        .with_proxy_interface("shop.BookIF");
    if let Some(cache) = &options.article_cache {
        book = book.with_cache(cache.clone());
    }
    repo.add_class(book);

    repo.add_class(
        ClassDescriptor::new("people.Person")
            .with_pk("id")
            .with_field("name")
            .with_field("friend_id")
            .with_reference(ReferenceDescriptor::new("friend", "people.Person", &["friend_id"]))
            .with_proxy_interface("people.PersonIF"),
    );

    repo.add_class(
        ClassDescriptor::new("values.Currency")
            .with_pk("code")
            .with_field("name"),
    );
    repo
}
