use super::*;
use crate::adapter::mock::MockAdapter;
use crate::column::Column;
use crate::config::DbConfig;
use crate::db::Db;
use crate::logger::StatsLogger;
use crate::record;
use crate::record::Record;
use crate::table::Table;
use serde::Deserialize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

fn db(mock: &MockAdapter) -> Db {
    Db::new(mock.clone(), DbConfig::default())
}

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn users() -> Table {
    Table::new(
        "users",
        Shape::new()
            .column("id", Column::integer().primary_key())
            .column("name", Column::text())
            .column("first_name", Column::text().name("firstName")),
    )
}

/// Answers selects with `rows` and everything else with nothing.
fn selecting(rows: Vec<Record>) -> MockAdapter {
    MockAdapter::with_handler(move |sql, _| {
        Ok(if sql.starts_with("SELECT") {
            rows.clone()
        } else {
            Vec::new()
        })
    })
}

#[test]
fn clones_are_independent() {
    let base = users().query().where_eq("name", "a");
    let before = base.to_sql().unwrap();

    let derived = base.clone().where_eq("id", 1).order("id").limit(3);

    assert_eq!(base.to_sql().unwrap(), before);
    assert_ne!(derived.to_sql().unwrap(), before);
}

#[test]
fn merging_an_empty_query_changes_nothing() {
    let query = users()
        .query()
        .where_eq("name", "a")
        .or(|w| w.eq("id", 1).eq("id", 2))
        .order_desc("id")
        .limit(10)
        .take_optional();

    let merged = query.clone().merge(&Query::empty());

    assert_eq!(merged.to_sql().unwrap(), query.to_sql().unwrap());
    assert_eq!(merged.return_type, query.return_type);
    assert_eq!(merged.kind, query.kind);
}

#[test]
fn an_explicit_all_overrides_a_single_row_merge() {
    let merged = Query::table("t").take().merge(&Query::empty().all());
    assert_eq!(merged.return_type, ReturnType::All);
    assert_eq!(merged.to_sql().unwrap().text, r#"SELECT "t".* FROM "t""#);

    let kept = Query::table("t")
        .take()
        .merge(&Query::empty().where_eq("a", 1));
    assert_eq!(kept.return_type, ReturnType::OneOrThrow);
}

#[tokio::test]
async fn none_never_reaches_the_adapter() {
    let mock = MockAdapter::new();
    let db = db(&mock);
    let query = Query::table("t").where_eq("a", 1).none();

    assert!(query.clone().fetch_all(&db).await.unwrap().is_empty());
    assert_eq!(query.clone().fetch_optional(&db).await.unwrap(), None);
    assert!(!query.clone().exists(&db).await.unwrap());
    assert_eq!(query.clone().count(&db).await.unwrap(), 0);
    assert!(query.clone().fetch_pluck(&db).await.unwrap().is_empty());
    assert!(query.fetch_one(&db).await.unwrap_err().is_not_found());

    assert_eq!(mock.query_count(), 0);
}

#[tokio::test]
async fn fetches_rows_values_and_structs() {
    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        id: i64,
        name: String,
    }

    let mock = selecting(vec![
        record! { "id" => 1, "name" => "alice" },
        record! { "id" => 2, "name" => "bob" },
    ]);
    let db = db(&mock);
    let query = Query::table("users");

    let rows = query.clone().fetch_all(&db).await.unwrap();
    assert_eq!(rows.len(), 2);

    let one = query.clone().fetch_one(&db).await.unwrap();
    assert_eq!(one.get("name"), Some(&Value::from("alice")));

    let id = query.clone().get("id").fetch_value(&db).await.unwrap();
    assert_eq!(id, Value::Int(1));

    let ids = query.clone().fetch_pluck(&db).await.unwrap();
    assert_eq!(ids, vec![Value::Int(1), Value::Int(2)]);

    let positional = query.clone().fetch_rows(&db).await.unwrap();
    assert_eq!(positional[1], vec![Value::Int(2), Value::from("bob")]);

    let users: Vec<User> = query.clone().fetch_all_as(&db).await.unwrap();
    assert_eq!(
        users[0],
        User {
            id: 1,
            name: "alice".into()
        }
    );

    assert_eq!(query.count(&db).await.unwrap(), 1);
    assert_eq!(
        mock.statements().last().map(String::as_str),
        Some(r#"SELECT count(*) FROM "users""#)
    );
}

#[tokio::test]
async fn missing_rows() {
    let mock = MockAdapter::new();
    let db = db(&mock);

    let err = users().query().find(1).fetch_one(&db).await.unwrap_err();
    assert_eq!(err.to_string(), "Not found: No row found in `users`");

    let row = users().query().find(1).fetch_optional(&db).await.unwrap();
    assert_eq!(row, None);

    let err = Query::table("t")
        .take_optional()
        .throw_on_not_found()
        .run(&db)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = Query::table("t").get("v").fetch_value(&db).await.unwrap_err();
    assert!(err.is_not_found());

    let missing = Query::table("t").get_optional("v").fetch_value(&db).await.unwrap();
    assert_eq!(missing, Value::Null);

    let fallback = Query::table("t")
        .get_optional("v")
        .value_or(5)
        .fetch_value(&db)
        .await
        .unwrap();
    assert_eq!(fallback, Value::Int(5));
}

#[tokio::test]
async fn coalesce_replaces_null_values() {
    let mock = selecting(vec![record! { "v" => Value::Null }]);
    let db = db(&mock);

    let value = Query::table("t")
        .get_optional("v")
        .coalesce(0)
        .fetch_value(&db)
        .await
        .unwrap();
    assert_eq!(value, Value::Int(0));

    let raw = Query::table("t").get_optional("v").fetch_value(&db).await.unwrap();
    assert_eq!(raw, Value::Null);
}

#[tokio::test]
async fn column_and_query_parsers_apply_in_order() {
    let table = Table::new(
        "t",
        Shape::new().column(
            "n",
            Column::integer().parse(|v| Value::Int(v.as_i64().unwrap_or(0) * 10)),
        ),
    );
    let mock = selecting(vec![record! { "n" => 1 }, record! { "n" => Value::Null }]);
    let db = db(&mock);

    let rows = table
        .query()
        .parse("n", |v| match v {
            Value::Int(n) => Value::Int(n + 1),
            other => other,
        })
        .fetch_all(&db)
        .await
        .unwrap();
    assert_eq!(rows[0].get("n"), Some(&Value::Int(11)));
    assert_eq!(rows[1].get("n"), Some(&Value::Null));

    let plucked = table.query().pluck("n").fetch_pluck(&db).await.unwrap();
    assert_eq!(plucked, vec![Value::Int(10), Value::Null]);
}

#[tokio::test]
async fn hooks_fire_around_mutations() {
    let before = counter();
    let after = counter();
    let returned = counter();
    let mock = MockAdapter::with_handler(|sql, _| {
        Ok(if sql.starts_with("INSERT") {
            vec![record! { "id" => 7, "name" => "a" }]
        } else {
            Vec::new()
        })
    });
    let db = db(&mock);

    let query = users()
        .query()
        .before_create({
            let before = before.clone();
            move |_| {
                before.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .after_create({
            let after = after.clone();
            let returned = returned.clone();
            move |rows, _| {
                after.fetch_add(1, Ordering::SeqCst);
                returned.fetch_add(rows.len(), Ordering::SeqCst);
                Ok(())
            }
        });

    let inserted = query
        .clone()
        .insert(record! { "name" => "a" })
        .execute(&db)
        .await
        .unwrap();
    assert_eq!(inserted, 1);
    assert_eq!(before.load(Ordering::SeqCst), 1);
    assert_eq!(after.load(Ordering::SeqCst), 1);
    assert_eq!(returned.load(Ordering::SeqCst), 1);
    assert_eq!(
        mock.statements()[0],
        r#"INSERT INTO "users" ("name") VALUES ($1) RETURNING "users"."id", "users"."name", "users"."firstName" AS "first_name""#
    );

    // Update hooks are not create hooks.
    query
        .find(7)
        .update(record! { "name" => "b" })
        .execute(&db)
        .await
        .unwrap();
    assert_eq!(before.load(Ordering::SeqCst), 1);
    assert_eq!(after.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn before_hook_errors_abort_the_query() {
    let mock = MockAdapter::new();
    let db = db(&mock);

    let err = Query::table("t")
        .before_query(|_| Err(QbError::validation("not allowed")))
        .fetch_all(&db)
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert_eq!(mock.query_count(), 0);
}

#[tokio::test]
async fn build_errors_are_reported_before_sending() {
    let mock = MockAdapter::new();
    let db = db(&mock);

    let err = Query::table("t").delete().execute(&db).await.unwrap_err();

    assert!(err.is_validation());
    assert_eq!(mock.query_count(), 0);
}

#[tokio::test]
async fn execution_errors_carry_the_call_site() {
    let mock = MockAdapter::with_handler(|_, _| Err(QbError::adapter("connection reset")));
    let db = db(&mock);

    let err = Query::table("t").fetch_all(&db).await.unwrap_err();

    let location = err.location().expect("call site recorded");
    assert!(location.file().ends_with("tests.rs"));
}

#[tokio::test]
async fn unique_violations_report_logical_keys() {
    let mock = MockAdapter::with_handler(|_, _| {
        Err(QbError::unique_violation(
            "users_firstName_key",
            vec!["firstName".into()],
            "duplicate key value",
        ))
    });
    let db = db(&mock);

    let err = users()
        .query()
        .insert(record! { "first_name" => "a" })
        .execute(&db)
        .await
        .unwrap_err();

    let location = err.location().expect("call site recorded");
    assert!(location.file().ends_with("tests.rs"));
    match err {
        QbError::UniqueViolation { columns, .. } => assert_eq!(columns, vec!["first_name"]),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn soft_deletes_hand_deleted_rows_to_delete_hooks() {
    let deleted = counter();
    let mock = MockAdapter::with_handler(|sql, _| {
        Ok(if sql.starts_with("UPDATE") {
            vec![record! { "id" => 1, "deleted_at" => Value::Null }]
        } else {
            Vec::new()
        })
    });
    let db = db(&mock);
    let table = Table::new(
        "users",
        Shape::new()
            .column("id", Column::integer().primary_key())
            .column("deleted_at", Column::timestamptz().nullable()),
    )
    .soft_delete("deleted_at");

    let count = table
        .query()
        .after_delete({
            let deleted = deleted.clone();
            move |rows, _| {
                deleted.fetch_add(rows.len(), Ordering::SeqCst);
                Ok(())
            }
        })
        .find(1)
        .delete()
        .execute(&db)
        .await
        .unwrap();

    assert_eq!(count, 1);
    assert_eq!(deleted.load(Ordering::SeqCst), 1);
    assert_eq!(
        mock.statements()[0],
        r#"UPDATE "users" SET "deleted_at" = now() WHERE "users"."id" = $1 AND "users"."deleted_at" IS NULL RETURNING *"#
    );
}

#[tokio::test]
async fn query_loggers_see_each_statement() {
    let stats = Arc::new(StatsLogger::new());
    let mock = MockAdapter::new();
    let db = db(&mock);

    Query::table("t")
        .log(Logger::new(stats.clone()))
        .fetch_all(&db)
        .await
        .unwrap();
    Query::table("t")
        .where_eq("id", 1)
        .delete()
        .log(Logger::new(stats.clone()))
        .execute(&db)
        .await
        .unwrap();

    let seen = stats.stats();
    assert_eq!(seen.total_queries, 2);
    assert_eq!(seen.select_count, 1);
    assert_eq!(seen.delete_count, 1);
}

#[tokio::test]
async fn wrapped_queries_run_in_their_own_transaction() {
    let mock = MockAdapter::new();
    let db = db(&mock);

    Query::table("t").wrap_in_transaction().fetch_all(&db).await.unwrap();

    assert_eq!(
        mock.statements(),
        vec!["BEGIN", r#"SELECT "t".* FROM "t""#, "COMMIT"]
    );
}

#[tokio::test]
async fn nested_transactions_use_savepoints() {
    let mock = MockAdapter::new();
    let db = db(&mock);
    let select = r#"SELECT "t".* FROM "t" WHERE "t"."id" = $1"#;
    let query = Query::table("t").where_eq("id", 1);

    db.transaction(|| async {
        query.clone().fetch_all(&db).await?;
        db.transaction(|| async { query.clone().fetch_all(&db).await })
            .await?;
        Ok::<_, QbError>(())
    })
    .await
    .unwrap();

    assert_eq!(
        mock.statements(),
        vec![
            "BEGIN",
            select,
            r#"SAVEPOINT "1""#,
            select,
            r#"RELEASE SAVEPOINT "1""#,
            "COMMIT",
        ]
    );
}

#[tokio::test]
async fn savepoints_are_numbered_per_transaction() {
    let mock = MockAdapter::new();
    let db = db(&mock);

    db.transaction(|| async {
        db.transaction(|| async { Ok::<_, QbError>(()) }).await?;
        let failed = db
            .transaction(|| async { Err::<(), _>(QbError::validation("fail")) })
            .await;
        assert!(failed.is_err());
        db.transaction(|| async { Ok::<_, QbError>(()) }).await?;
        Ok::<_, QbError>(())
    })
    .await
    .unwrap();

    assert_eq!(
        mock.statements(),
        vec![
            "BEGIN",
            r#"SAVEPOINT "1""#,
            r#"RELEASE SAVEPOINT "1""#,
            r#"SAVEPOINT "2""#,
            r#"ROLLBACK TO SAVEPOINT "2""#,
            r#"SAVEPOINT "3""#,
            r#"RELEASE SAVEPOINT "3""#,
            "COMMIT",
        ]
    );

    // A new outermost transaction starts counting again.
    db.transaction(|| async { db.transaction(|| async { Ok::<_, QbError>(()) }).await })
        .await
        .unwrap();
    assert_eq!(mock.statements()[9], r#"SAVEPOINT "1""#);
}

#[tokio::test]
async fn failing_transactions_roll_back() {
    let mock = MockAdapter::new();
    let db = db(&mock);

    let err = db
        .transaction(|| async {
            Query::table("t").fetch_all(&db).await?;
            Err::<(), _>(QbError::validation("abort"))
        })
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert_eq!(mock.statements().last().map(String::as_str), Some("ROLLBACK"));
    assert!(!db.in_transaction());
}

#[tokio::test]
async fn commit_hooks_wait_for_commit_and_skip_rolled_back_savepoints() {
    let fired = counter();
    let mock = MockAdapter::with_handler(|sql, values| {
        Ok(if sql.starts_with("INSERT") {
            vec![record! { "id" => values[0].clone() }]
        } else {
            Vec::new()
        })
    });
    let db = db(&mock);
    let query = Query::table("t").after_create_commit({
        let fired = fired.clone();
        move |_, _| {
            fired.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });

    db.transaction(|| async {
        query.clone().insert(record! { "id" => 1 }).execute(&db).await?;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        let nested = db
            .transaction(|| async {
                query.clone().insert(record! { "id" => 2 }).execute(&db).await?;
                Err::<(), _>(QbError::validation("undo"))
            })
            .await;
        assert!(nested.is_err());

        db.transaction(|| async { query.clone().insert(record! { "id" => 3 }).execute(&db).await })
            .await?;
        Ok::<_, QbError>(())
    })
    .await
    .unwrap();

    assert_eq!(fired.load(Ordering::SeqCst), 2);

    // Outside a transaction the hook runs right away.
    query.insert(record! { "id" => 4 }).execute(&db).await.unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn or_create_returns_an_existing_row_without_inserting() {
    let created = counter();
    let existing = record! { "id" => 1, "name" => "a" };
    let mock = selecting(vec![existing.clone()]);
    let db = db(&mock);

    let row = Query::table("users")
        .find_by(&record! { "name" => "a" })
        .before_create({
            let created = created.clone();
            move |_| {
                created.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .or_create(&db, record! { "name" => "a" })
        .await
        .unwrap();

    assert_eq!(row, existing);
    assert_eq!(created.load(Ordering::SeqCst), 0);
    assert!(!mock.statements().iter().any(|s| s.contains("INSERT")));
}

#[tokio::test]
async fn or_create_inserts_a_missing_row_once() {
    let before = counter();
    let after = counter();
    let mock = MockAdapter::with_handler(|sql, _| {
        Ok(if sql.starts_with("WITH") {
            vec![record! { "id" => 1, "name" => "a" }]
        } else {
            Vec::new()
        })
    });
    let db = db(&mock);

    let row = Query::table("users")
        .find_by(&record! { "name" => "a" })
        .before_create({
            let before = before.clone();
            move |_| {
                before.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .after_create({
            let after = after.clone();
            move |rows, _| {
                after.fetch_add(rows.len(), Ordering::SeqCst);
                Ok(())
            }
        })
        .or_create(&db, record! { "name" => "a" })
        .await
        .unwrap();

    assert_eq!(row.get("id"), Some(&Value::Int(1)));
    assert_eq!(before.load(Ordering::SeqCst), 1);
    assert_eq!(after.load(Ordering::SeqCst), 1);

    let statements = mock.statements();
    assert_eq!(statements.first().map(String::as_str), Some("BEGIN"));
    assert_eq!(statements.last().map(String::as_str), Some("COMMIT"));
    assert_eq!(
        statements[2],
        concat!(
            r#"WITH "q" AS (SELECT "users".* FROM "users" WHERE "users"."name" = $1 LIMIT 1) "#,
            r#"INSERT INTO "users" ("name") SELECT $2 WHERE NOT EXISTS (SELECT 1 FROM "q") RETURNING *"#
        )
    );
}

#[tokio::test]
async fn or_create_with_builds_data_only_when_needed() {
    let built = counter();
    let mock = selecting(vec![record! { "id" => 1 }]);
    let db = db(&mock);

    Query::table("users")
        .find(1)
        .or_create_with(&db, {
            let built = built.clone();
            move || {
                built.fetch_add(1, Ordering::SeqCst);
                Ok(Data::from(record! { "id" => 1 }))
            }
        })
        .await
        .unwrap();

    assert_eq!(built.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn concurrent_or_create_inserts_one_row() {
    let stored: Arc<Mutex<Option<Record>>> = Arc::new(Mutex::new(None));
    let inserts = counter();
    let mock = MockAdapter::with_handler({
        let stored = stored.clone();
        let inserts = inserts.clone();
        move |sql, _| {
            let mut stored = stored.lock().unwrap();
            if sql.starts_with("WITH") {
                if stored.is_some() {
                    return Ok(Vec::new());
                }
                inserts.fetch_add(1, Ordering::SeqCst);
                let row = record! { "id" => 1, "name" => "a" };
                *stored = Some(row.clone());
                Ok(vec![row])
            } else if sql.starts_with("SELECT") {
                Ok(stored.iter().cloned().collect())
            } else {
                Ok(Vec::new())
            }
        }
    });
    let db = db(&mock);
    let query = Query::table("users").find_by(&record! { "name" => "a" });

    let (first, second) = tokio::join!(
        query.clone().or_create(&db, record! { "name" => "a" }),
        query.clone().or_create(&db, record! { "name" => "a" })
    );

    assert_eq!(inserts.load(Ordering::SeqCst), 1);
    assert_eq!(first.unwrap(), second.unwrap());
}

#[tokio::test]
async fn or_create_requires_a_single_row_query() {
    let mock = MockAdapter::new();
    let db = db(&mock);

    let err = Query::table("users")
        .or_create(&db, record! { "name" => "a" })
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert_eq!(mock.query_count(), 0);
}

#[tokio::test]
async fn upsert_updates_or_creates() {
    let mock = MockAdapter::with_handler(|sql, _| {
        Ok(if sql.starts_with("UPDATE") {
            vec![record! { "id" => 1, "name" => "b" }]
        } else {
            Vec::new()
        })
    });
    let db = db(&mock);

    let row = Query::table("users")
        .find(1)
        .upsert(&db, record! { "name" => "b" }, record! { "id" => 1, "name" => "b" })
        .await
        .unwrap();

    assert_eq!(row.get("name"), Some(&Value::from("b")));
    assert_eq!(
        mock.statements()[1],
        r#"UPDATE "users" SET "name" = $1 WHERE "users"."id" = $2 RETURNING *"#
    );
    assert!(!mock.statements().iter().any(|s| s.contains("INSERT")));
}

#[tokio::test]
async fn upsert_refuses_to_update_several_rows() {
    let mock = MockAdapter::with_handler(|sql, _| {
        Ok(if sql.starts_with("UPDATE") {
            vec![record! { "id" => 1 }, record! { "id" => 2 }]
        } else {
            Vec::new()
        })
    });
    let db = db(&mock);

    let err = Query::table("users")
        .find_by(&record! { "name" => "a" })
        .upsert(&db, record! { "name" => "b" }, record! { "name" => "b" })
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "Validation error: upsert updated 2 rows of `users`; the query must match at most one row"
    );
    assert_eq!(mock.statements().last().map(String::as_str), Some("ROLLBACK"));
}
