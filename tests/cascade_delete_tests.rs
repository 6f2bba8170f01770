use memocascade::{
    Association, DbError, Entity, EntityListener, EntityRef, EntityType, GraphExecutor,
    IncludeTree, IncludeTypes, MetadataRegistry, Pagination, Predicate, Result, Topology, Value,
};
use std::sync::{Arc, Mutex};

fn orders() -> Result<GraphExecutor> {
    let registry = MetadataRegistry::builder()
        .register(
            EntityType::new("Order", "id").association(
                Association::many("lines", "LineItem", Topology::inverse("orderId"))
                    .cascade(IncludeTypes::ALL),
            ),
        )
        .register(EntityType::new("LineItem", "id").sequence_key())
        .register(EntityType::new("Note", "id"))
        .build()?;
    Ok(GraphExecutor::in_memory(registry))
}

fn seed_order(executor: &GraphExecutor, id: i64, quantities: &[i64]) -> Result<Vec<EntityRef>> {
    let lines: Vec<EntityRef> = quantities
        .iter()
        .map(|qty| EntityRef::new(Entity::new("LineItem").with_field("qty", *qty)))
        .collect();
    let order = EntityRef::new(
        Entity::new("Order")
            .with_key(id)
            .with_field("status", "open")
            .with_many("lines", lines.clone()),
    );
    executor.create(&order, &executor.persist_tree("Order")?)?;
    Ok(lines)
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
    veto_delete: bool,
}

impl Recorder {
    fn push(&self, event: &str, entity: &Entity) -> Result<()> {
        self.events
            .lock()?
            .push(format!("{}:{}", event, entity.key()));
        Ok(())
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl EntityListener for Recorder {
    fn before_create(&self, entity: &mut Entity) -> Result<()> {
        entity.set_field("stamped", true);
        self.push("before_create", entity)
    }

    fn after_load(&self, entity: &Entity) -> Result<()> {
        self.push("after_load", entity)
    }

    fn before_delete(&self, entity: &Entity) -> Result<()> {
        if self.veto_delete {
            return Err(DbError::ExecutionError(format!("order {} is locked", entity.key())));
        }
        self.push("before_delete", entity)
    }

    fn after_delete(&self, entity: &Entity) -> Result<()> {
        self.push("after_delete", entity)
    }
}

#[test]
fn test_delete_order_cascades_to_line_items() -> Result<()> {
    let executor = orders()?;
    let lines = seed_order(&executor, 5, &[1, 2, 3])?;
    seed_order(&executor, 6, &[4])?;
    assert_eq!(executor.count("LineItem", &Predicate::eq("orderId", 5))?, 3);

    // The empty tree still gets the default delete cascade.
    assert!(executor.delete("Order", &Value::from(5), &executor.include("Order"))?);

    assert!(executor.get("Order", &Value::from(5), &executor.include("Order"))?.is_none());
    for item in &lines {
        let key = item.key()?;
        assert!(executor.get("LineItem", &key, &executor.include("LineItem"))?.is_none());
    }
    assert_eq!(executor.count("LineItem", &Predicate::eq("orderId", 5))?, 0);
    // Order 6 is untouched.
    assert_eq!(executor.count("LineItem", &Predicate::eq("orderId", 6))?, 1);
    assert!(executor.get("Order", &Value::from(6), &executor.include("Order"))?.is_some());
    Ok(())
}

#[test]
fn test_delete_of_absent_key_returns_false() -> Result<()> {
    let executor = orders()?;
    // Forced cascade path: the root is looked up first.
    assert!(!executor.delete("Order", &Value::from(404), &executor.include("Order"))?);
    // Direct path: nothing to cascade, nothing to load.
    assert!(!executor.delete("Note", &Value::from(404), &executor.include("Note"))?);
    Ok(())
}

#[test]
fn test_delete_without_cascade_skips_the_load() -> Result<()> {
    let executor = orders()?;
    let note = EntityRef::new(Entity::new("Note").with_key(1).with_field("text", "hi"));
    executor.create(&note, &executor.include("Note"))?;

    let backend = executor.storage().backend("Note")?;
    let before = backend.call_counts().unwrap_or_default();
    assert!(executor.delete("Note", &Value::from(1), &executor.include("Note"))?);
    let after = backend.call_counts().unwrap_or_default();

    assert_eq!(after.reads(), before.reads());
    assert_eq!(after.delete - before.delete, 1);
    Ok(())
}

#[test]
fn test_delete_entity_of_missing_record_is_not_found() -> Result<()> {
    let executor = orders()?;
    let ghost = EntityRef::new(Entity::new("Order").with_key(99));
    let err = executor.delete_entity(&ghost, &executor.include("Order")).unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}

#[test]
fn test_delete_all_counts_removed_roots() -> Result<()> {
    let executor = orders()?;
    seed_order(&executor, 1, &[1])?;
    seed_order(&executor, 2, &[1, 1])?;

    let tree = executor.remove_tree("Order")?;
    let roots = executor.list("Order", &Predicate::All, &Pagination::all(), &executor.include("Order"))?;
    assert_eq!(executor.delete_all(&roots, &tree)?, 2);
    assert_eq!(executor.count("Order", &Predicate::All)?, 0);
    assert_eq!(executor.count("LineItem", &Predicate::All)?, 0);
    Ok(())
}

#[test]
fn test_listeners_see_lifecycle_and_can_veto() -> Result<()> {
    let recorder = Arc::new(Recorder::default());
    let executor = orders()?.with_listener("Order", recorder.clone());
    seed_order(&executor, 5, &[1])?;

    let stored = executor
        .get("Order", &Value::from(5), &executor.include("Order"))?
        .expect("order 5 is stored");
    assert_eq!(stored.field("stamped")?, Value::from(true));

    assert!(executor.delete("Order", &Value::from(5), &executor.include("Order"))?);
    assert_eq!(
        recorder.events(),
        vec![
            "before_create:5",
            "after_load:5",
            "after_load:5",
            "before_delete:5",
            "after_delete:5",
        ]
    );

    let vetoing = Arc::new(Recorder {
        veto_delete: true,
        ..Recorder::default()
    });
    let guarded = orders()?.with_listener("Order", vetoing);
    seed_order(&guarded, 7, &[1, 2])?;
    let err = guarded
        .delete("Order", &Value::from(7), &guarded.include("Order"))
        .unwrap_err();
    assert!(err.to_string().contains("locked"));
    assert!(guarded.get("Order", &Value::from(7), &guarded.include("Order"))?.is_some());
    assert_eq!(guarded.count("LineItem", &Predicate::All)?, 2);
    Ok(())
}

#[test]
fn test_shared_child_is_removed_with_its_last_owner() -> Result<()> {
    let registry = MetadataRegistry::builder()
        .register(
            EntityType::new("Post", "id").association(
                Association::one("attachment", "Blob", Topology::owning("blobId"))
                    .cascade(IncludeTypes::FETCH | IncludeTypes::DELETE_ORPHANS),
            ),
        )
        .register(EntityType::new("Blob", "id"))
        .build()?;
    let executor = GraphExecutor::in_memory(registry);

    let blob = EntityRef::new(Entity::new("Blob").with_key(1).with_field("bytes", 512));
    executor.create(&blob, &executor.include("Blob"))?;
    for id in [10, 11] {
        let post = EntityRef::new(Entity::new("Post").with_key(id).with_field("blobId", 1));
        executor.create(&post, &executor.include("Post"))?;
    }

    // 1. Another post still links the blob.
    assert!(executor.delete("Post", &Value::from(10), &executor.include("Post"))?);
    assert!(executor.get("Blob", &Value::from(1), &executor.include("Blob"))?.is_some());

    // 2. The last owner takes the orphan with it.
    assert!(executor.delete("Post", &Value::from(11), &executor.include("Post"))?);
    assert!(executor.get("Blob", &Value::from(1), &executor.include("Blob"))?.is_none());
    Ok(())
}

#[test]
fn test_bidirectional_delete_cascade_terminates() -> Result<()> {
    let registry = MetadataRegistry::builder()
        .register(
            EntityType::new("Author", "id").association(
                Association::many("books", "Book", Topology::inverse("authorId"))
                    .cascade(IncludeTypes::FETCH | IncludeTypes::DELETE)
                    .inverse_of("author"),
            ),
        )
        .register(
            EntityType::new("Book", "id").association(
                Association::one("author", "Author", Topology::owning("authorId"))
                    .cascade(IncludeTypes::FETCH | IncludeTypes::DELETE)
                    .inverse_of("books"),
            ),
        )
        .build()?;
    let executor = GraphExecutor::in_memory(registry);
    executor.create(
        &EntityRef::new(Entity::new("Author").with_key(1)),
        &executor.include("Author"),
    )?;
    for id in [10, 11] {
        let book = EntityRef::new(Entity::new("Book").with_key(id).with_field("authorId", 1));
        executor.create(&book, &executor.include("Book"))?;
    }

    let tree: IncludeTree = executor.remove_tree("Author")?;
    assert!(executor.delete("Author", &Value::from(1), &tree)?);
    assert_eq!(executor.count("Book", &Predicate::All)?, 0);
    assert_eq!(executor.count("Author", &Predicate::All)?, 0);
    Ok(())
}

#[test]
fn test_deleting_a_book_takes_its_author_and_siblings() -> Result<()> {
    let registry = MetadataRegistry::builder()
        .register(
            EntityType::new("Author", "id").association(
                Association::many("books", "Book", Topology::inverse("authorId"))
                    .cascade(IncludeTypes::DELETE),
            ),
        )
        .register(
            EntityType::new("Book", "id").association(
                Association::one("author", "Author", Topology::owning("authorId"))
                    .cascade(IncludeTypes::DELETE),
            ),
        )
        .build()?;
    let executor = GraphExecutor::in_memory(registry);
    executor.create(
        &EntityRef::new(Entity::new("Author").with_key(1)),
        &executor.include("Author"),
    )?;
    for id in [10, 11, 12] {
        let book = EntityRef::new(Entity::new("Book").with_key(id).with_field("authorId", 1));
        executor.create(&book, &executor.include("Book"))?;
    }

    // Book 10 -> Author 1 -> Books 10, 11, 12; book 10 is already being deleted.
    let mut uow = executor.unit_of_work();
    assert!(uow.delete("Book", &Value::from(10), &IncludeTree::empty("Book"))?);
    assert_eq!(executor.count("Book", &Predicate::All)?, 0);
    assert_eq!(executor.count("Author", &Predicate::All)?, 0);
    assert!(uow.identity().is_empty());
    Ok(())
}

fn posts(policy: IncludeTypes) -> Result<GraphExecutor> {
    let registry = MetadataRegistry::builder()
        .register(
            EntityType::new("Post", "id").association(
                Association::one("attachment", "Blob", Topology::owning("blobId")).cascade(policy),
            ),
        )
        .register(EntityType::new("Blob", "id"))
        .build()?;
    Ok(GraphExecutor::in_memory(registry))
}

fn seed_posts(executor: &GraphExecutor, blobs: &[i64], posts: &[(i64, i64)]) -> Result<()> {
    for id in blobs {
        let blob = EntityRef::new(Entity::new("Blob").with_key(*id));
        executor.create(&blob, &executor.include("Blob"))?;
    }
    for (id, blob_id) in posts {
        let post = EntityRef::new(Entity::new("Post").with_key(*id).with_field("blobId", *blob_id));
        executor.create(&post, &executor.include("Post"))?;
    }
    Ok(())
}

#[test]
fn test_delete_through_a_reference_follows_stored_links() -> Result<()> {
    let executor = posts(IncludeTypes::FETCH | IncludeTypes::DELETE)?;
    seed_posts(&executor, &[1], &[(10, 1)])?;

    // The stub carries no blobId; the cascade reads it from storage.
    let stub = EntityRef::new(Entity::reference("Post", 10));
    executor.delete_entity(&stub, &executor.include("Post"))?;

    assert_eq!(executor.count("Post", &Predicate::All)?, 0);
    assert_eq!(executor.count("Blob", &Predicate::All)?, 0);
    Ok(())
}

#[test]
fn test_replaced_link_sweeps_the_orphaned_blob() -> Result<()> {
    let executor = posts(IncludeTypes::FETCH | IncludeTypes::UPDATE | IncludeTypes::DELETE_ORPHANS)?;
    seed_posts(&executor, &[1, 2, 3], &[(10, 1), (11, 2), (12, 2)])?;
    let tree = executor.persist_tree("Post")?;

    // 1. Blob 1 loses its only post.
    let post = EntityRef::new(
        Entity::new("Post")
            .with_key(10)
            .with_field("blobId", 1)
            .with_one("attachment", Some(EntityRef::new(Entity::reference("Blob", 3)))),
    );
    executor.update(&post, &tree)?;
    assert_eq!(post.field("blobId")?, Value::from(3));
    assert!(executor.get("Blob", &Value::from(1), &executor.include("Blob"))?.is_none());

    // 2. Blob 2 is still linked from post 12.
    let post = EntityRef::new(
        Entity::new("Post")
            .with_key(11)
            .with_field("blobId", 2)
            .with_one("attachment", Some(EntityRef::new(Entity::reference("Blob", 3)))),
    );
    executor.update(&post, &tree)?;
    assert!(executor.get("Blob", &Value::from(2), &executor.include("Blob"))?.is_some());
    assert!(executor.get("Blob", &Value::from(3), &executor.include("Blob"))?.is_some());
    Ok(())
}

#[test]
fn test_orphan_only_policy_removes_detached_lines() -> Result<()> {
    let registry = MetadataRegistry::builder()
        .register(
            EntityType::new("Order", "id").association(
                Association::many("lines", "LineItem", Topology::inverse("orderId")).cascade(
                    IncludeTypes::CREATE | IncludeTypes::UPDATE | IncludeTypes::DELETE_ORPHANS,
                ),
            ),
        )
        .register(EntityType::new("LineItem", "id").sequence_key())
        .build()?;
    let executor = GraphExecutor::in_memory(registry);
    seed_order(&executor, 5, &[1, 2])?;
    seed_order(&executor, 6, &[3])?;

    assert!(executor.delete("Order", &Value::from(5), &executor.include("Order"))?);

    let left = executor.list("LineItem", &Predicate::All, &Pagination::all(), &executor.include("LineItem"))?;
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].field("orderId")?, Value::from(6));
    Ok(())
}

fn enrollments(policy: IncludeTypes) -> Result<GraphExecutor> {
    let registry = MetadataRegistry::builder()
        .register(
            EntityType::new("Student", "id").association(
                Association::many(
                    "courses",
                    "Course",
                    Topology::join_table("Enrollment", "studentId", "courseId"),
                )
                .cascade(policy),
            ),
        )
        .register(EntityType::new("Course", "id"))
        .register(EntityType::new("Enrollment", "id").sequence_key())
        .build()?;
    Ok(GraphExecutor::in_memory(registry))
}

// Student 1 takes courses 100 and 101; student 2 shares course 101.
fn seed_students(executor: &GraphExecutor) -> Result<()> {
    let tree = executor.persist_tree("Student")?;
    let first = EntityRef::new(Entity::new("Student").with_key(1).with_many(
        "courses",
        vec![
            EntityRef::new(Entity::new("Course").with_key(100)),
            EntityRef::new(Entity::new("Course").with_key(101)),
        ],
    ));
    executor.create(&first, &tree)?;
    let second = EntityRef::new(
        Entity::new("Student")
            .with_key(2)
            .with_many("courses", vec![EntityRef::new(Entity::reference("Course", 101))]),
    );
    executor.create(&second, &tree)?;
    assert_eq!(executor.count("Enrollment", &Predicate::All)?, 3);
    Ok(())
}

#[test]
fn test_join_delete_removes_rows_and_courses() -> Result<()> {
    let executor = enrollments(IncludeTypes::ALL)?;
    seed_students(&executor)?;

    assert!(executor.delete("Student", &Value::from(1), &executor.include("Student"))?);

    assert_eq!(executor.count("Enrollment", &Predicate::eq("studentId", 1))?, 0);
    assert_eq!(executor.count("Enrollment", &Predicate::eq("studentId", 2))?, 1);
    assert_eq!(executor.count("Course", &Predicate::All)?, 0);
    Ok(())
}

#[test]
fn test_join_orphan_sweep_keeps_shared_courses() -> Result<()> {
    let executor = enrollments(IncludeTypes::PERSIST | IncludeTypes::DELETE_ORPHANS)?;
    seed_students(&executor)?;

    assert!(executor.delete("Student", &Value::from(1), &executor.include("Student"))?);

    assert_eq!(executor.count("Enrollment", &Predicate::All)?, 1);
    assert!(executor.get("Course", &Value::from(100), &executor.include("Course"))?.is_none());
    assert!(executor.get("Course", &Value::from(101), &executor.include("Course"))?.is_some());
    Ok(())
}
