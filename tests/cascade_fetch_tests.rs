use memocascade::{
    Association, BackendCallCounts, DbError, EngineConfig, Entity, EntityRef, EntityType, GraphExecutor,
    IncludeTree, IncludeTypes, MetadataRegistry, Pagination, Predicate, Result, Topology, Value,
};

// Author 1 writes books 10 and 11; both sides of the link fetch by default.
fn library() -> Result<GraphExecutor> {
    let registry = MetadataRegistry::builder()
        .register(
            EntityType::new("Author", "id").association(
                Association::many("books", "Book", Topology::inverse("authorId"))
                    .cascade(IncludeTypes::FETCH)
                    .inverse_of("author"),
            ),
        )
        .register(
            EntityType::new("Book", "id").association(
                Association::one("author", "Author", Topology::owning("authorId"))
                    .cascade(IncludeTypes::FETCH)
                    .inverse_of("books"),
            ),
        )
        .build()?;
    Ok(GraphExecutor::in_memory(registry))
}

fn seed(executor: &GraphExecutor, authors: &[(i64, &str)], books: &[(i64, i64, &str)]) -> Result<()> {
    for (id, name) in authors {
        let author = EntityRef::new(Entity::new("Author").with_key(*id).with_field("name", *name));
        executor.create(&author, &executor.include("Author"))?;
    }
    for (id, author_id, title) in books {
        let book = EntityRef::new(
            Entity::new("Book")
                .with_key(*id)
                .with_field("authorId", *author_id)
                .with_field("title", *title),
        );
        executor.create(&book, &executor.include("Book"))?;
    }
    Ok(())
}

fn counts(executor: &GraphExecutor, entity_type: &str) -> Result<BackendCallCounts> {
    Ok(executor
        .storage()
        .backend(entity_type)?
        .call_counts()
        .unwrap_or_default())
}

#[test]
fn test_get_with_default_fetch_tree() -> Result<()> {
    let executor = library()?;
    seed(&executor, &[(1, "Ursula")], &[(10, 1, "Earthsea"), (11, 1, "Lathe")])?;

    let tree = executor.fetch_tree("Author")?;
    let author = executor.get("Author", &Value::from(1), &tree)?.expect("author 1 is stored");

    let books = author.related("books")?;
    assert_eq!(books.len(), 2);
    assert_eq!(books[0].field("title")?, Value::from("Earthsea"));
    assert_eq!(books[1].field("title")?, Value::from("Lathe"));

    // The back reference resolves to the root handle itself.
    for book in &books {
        let back = book.related("author")?;
        assert_eq!(back.len(), 1);
        assert!(back[0].ptr_eq(&author));
    }
    Ok(())
}

#[test]
fn test_cyclic_include_terminates_and_traverses_each_edge_once() -> Result<()> {
    let executor = library()?;
    seed(&executor, &[(1, "Ursula")], &[(10, 1, "Earthsea"), (11, 1, "Lathe")])?;

    // Explicitly asks for Author.books a second time below Book.author.
    let tree = executor.parse_include("Author", "books{author{books{author}}}")?;
    let books_before = counts(&executor, "Book")?;
    let authors_before = counts(&executor, "Author")?;

    let author = executor.get("Author", &Value::from(1), &tree)?.expect("author 1 is stored");
    assert_eq!(author.related("books")?.len(), 2);

    let books_after = counts(&executor, "Book")?;
    let authors_after = counts(&executor, "Author")?;
    // One grouped child query; the second Author.books edge is a no-op.
    assert_eq!(books_after.list - books_before.list, 1);
    // The root read; Book.author is served from the identity map.
    assert_eq!(authors_after.get - authors_before.get, 1);
    assert_eq!(authors_after.get_many, authors_before.get_many);
    Ok(())
}

#[test]
fn test_shared_parent_converges_to_one_instance() -> Result<()> {
    let executor = library()?;
    seed(&executor, &[(1, "Ursula")], &[(10, 1, "Earthsea"), (11, 1, "Lathe")])?;

    let tree = executor.parse_include("Book", "author{}")?;
    let before = counts(&executor, "Author")?;
    let books = executor.list("Book", &Predicate::All, &Pagination::all(), &tree)?;
    let after = counts(&executor, "Author")?;

    assert_eq!(books.len(), 2);
    let first = books[0].related("author")?;
    let second = books[1].related("author")?;
    assert!(first[0].ptr_eq(&second[0]));
    assert_eq!(first[0].field("name")?, Value::from("Ursula"));
    assert_eq!(after.get_many - before.get_many, 1);
    Ok(())
}

#[test]
fn test_parents_are_batched_by_configured_size() -> Result<()> {
    let executor = library()?.with_config(EngineConfig::new().batch_size(2))?;
    seed(
        &executor,
        &[(1, "A"), (2, "B"), (3, "C"), (4, "D"), (5, "E")],
        &[(11, 1, "a"), (12, 2, "b"), (13, 3, "c"), (14, 4, "d"), (15, 5, "e")],
    )?;

    let tree = executor.parse_include("Book", "author{}")?;
    let before = counts(&executor, "Author")?;
    let books = executor.list("Book", &Predicate::All, &Pagination::all(), &tree)?;
    let after = counts(&executor, "Author")?;

    assert_eq!(books.len(), 5);
    // Five distinct keys in groups of two.
    assert_eq!(after.get_many - before.get_many, 3);
    for book in &books {
        let author = book.related("author")?;
        assert_eq!(author[0].key()?, book.field("authorId")?);
    }
    Ok(())
}

#[test]
fn test_unit_of_work_shares_identity_across_calls() -> Result<()> {
    let executor = library()?;
    seed(&executor, &[(1, "Ursula")], &[(10, 1, "Earthsea")])?;
    let empty = IncludeTree::empty("Author");

    let mut uow = executor.unit_of_work();
    let first = uow.get("Author", &Value::from(1), &empty)?.expect("stored");
    let second = uow.get("Author", &Value::from(1), &empty)?.expect("stored");
    assert!(first.ptr_eq(&second));

    // Separate calls run separate units of work.
    let other = executor.get("Author", &Value::from(1), &empty)?.expect("stored");
    assert!(!other.ptr_eq(&first));
    Ok(())
}

#[test]
fn test_resolve_lazily_loads_one_association() -> Result<()> {
    let executor = library()?;
    seed(&executor, &[(1, "Ursula")], &[(10, 1, "Earthsea"), (11, 1, "Lathe")])?;

    let mut uow = executor.unit_of_work();
    let author = uow
        .get("Author", &Value::from(1), &IncludeTree::empty("Author"))?
        .expect("stored");
    assert!(!author.has_relation("books")?);

    let books = uow.resolve(&author, "books")?;
    assert_eq!(books.len(), 2);
    assert!(!author.has_relation("books")?);
    assert!(uow.resolve(&author, "reviews").is_err());
    Ok(())
}

#[test]
fn test_list_first_and_count() -> Result<()> {
    let executor = library()?;
    seed(
        &executor,
        &[(1, "Ursula"), (2, "Iain")],
        &[(10, 1, "Earthsea"), (11, 1, "Lathe"), (12, 2, "Excession")],
    )?;
    let tree = IncludeTree::empty("Book");

    let page = executor.list("Book", &Predicate::All, &Pagination::new(1, 1), &tree)?;
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].key()?, Value::from(11));

    let first = executor
        .first("Book", &Predicate::eq("authorId", 2), &tree)?
        .expect("one book by author 2");
    assert_eq!(first.field("title")?, Value::from("Excession"));
    assert!(executor.first("Book", &Predicate::eq("authorId", 3), &tree)?.is_none());

    assert_eq!(executor.count("Book", &Predicate::eq("authorId", 1))?, 2);
    assert!(executor.get("Book", &Value::from(99), &tree)?.is_none());
    Ok(())
}

#[test]
fn test_include_tree_must_match_root_type() {
    let executor = library().unwrap();
    let err = executor
        .get("Author", &Value::from(1), &IncludeTree::empty("Book"))
        .unwrap_err();
    assert!(matches!(err, memocascade::DbError::TypeMismatch(_)));
}

#[test]
fn test_embedded_children_round_trip() -> Result<()> {
    let registry = MetadataRegistry::builder()
        .register(
            EntityType::new("Person", "id").association(
                Association::many("addresses", "Address", Topology::embedded("addresses"))
                    .cascade(IncludeTypes::ALL | IncludeTypes::FETCH),
            ),
        )
        .register(EntityType::new("Address", "label").embeddable())
        .build()?;
    let executor = GraphExecutor::in_memory(registry);

    let home = EntityRef::new(Entity::new("Address").with_key("home").with_field("city", "Oslo"));
    let work = EntityRef::new(Entity::new("Address").with_key("work").with_field("city", "Bergen"));
    let person = EntityRef::new(
        Entity::new("Person")
            .with_key(1)
            .with_many("addresses", vec![home, work]),
    );
    executor.create(&person, &executor.persist_tree("Person")?)?;

    let loaded = executor
        .get("Person", &Value::from(1), &executor.fetch_tree("Person")?)?
        .expect("person 1 is stored");
    let addresses = loaded.related("addresses")?;
    assert_eq!(addresses.len(), 2);
    assert_eq!(addresses[0].key()?, Value::from("home"));
    assert_eq!(addresses[1].field("city")?, Value::from("Bergen"));
    // Embedded children have no identity of their own.
    assert!(executor.storage().backend("Address").is_err());
    Ok(())
}

#[test]
fn test_depth_limit_stops_deep_cascades() -> Result<()> {
    let executor = library()?.with_config(EngineConfig::new().max_depth(1))?;
    seed(&executor, &[(1, "Ursula")], &[(10, 1, "Earthsea")])?;

    // books is one level; books -> author needs a second.
    let shallow = executor.parse_include("Author", "books{}")?;
    let author = executor.get("Author", &Value::from(1), &shallow)?.expect("stored");
    assert_eq!(author.related("books")?.len(), 1);

    let err = executor
        .get("Author", &Value::from(1), &executor.fetch_tree("Author")?)
        .unwrap_err();
    assert_eq!(err, memocascade::DbError::DepthExceeded(1));
    Ok(())
}

#[test]
fn test_executor_rejects_zero_limits() -> Result<()> {
    let zero_depth = library()?.with_config(EngineConfig::new().max_depth(0));
    assert!(matches!(zero_depth, Err(DbError::InvalidConfiguration(_))));

    let zero_batch = library()?.with_config(EngineConfig::new().batch_size(0));
    assert!(matches!(zero_batch, Err(DbError::InvalidConfiguration(_))));
    Ok(())
}

#[test]
fn test_deeper_fetch_reaches_below_an_earlier_edge() -> Result<()> {
    let executor = library()?;
    seed(&executor, &[(1, "Ursula")], &[(10, 1, "Earthsea"), (11, 1, "Lathe")])?;
    let mut uow = executor.unit_of_work();

    // 1. Shallow fetch leaves the books' author slot untouched
    let shallow = executor.parse_include("Author", "books{}")?;
    let author = uow.get("Author", &Value::from(1), &shallow)?.expect("author 1 is stored");
    let books = author.related("books")?;
    assert_eq!(books.len(), 2);
    assert!(!books[0].has_relation("author")?);

    // 2. Deeper fetch in the same unit of work fills the nested slot
    let deep = executor.parse_include("Author", "books{author{}}")?;
    let before = counts(&executor, "Book")?;
    let again = uow.get("Author", &Value::from(1), &deep)?.expect("author 1 is stored");
    let after = counts(&executor, "Book")?;
    assert!(again.ptr_eq(&author));
    assert_eq!(after.list, before.list);

    for book in &author.related("books")? {
        let back = book.related("author")?;
        assert_eq!(back.len(), 1);
        assert!(back[0].ptr_eq(&author));
    }
    Ok(())
}
