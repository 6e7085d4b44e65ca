use crate::column::{Column, Shape};
use crate::error::QbError;
use crate::predicate::Op;
use crate::query::{JoinKind, Query};
use crate::raw::{RawSql, sql};
use crate::record::Record;
use crate::table::Table;
use crate::value::Value;
use crate::{col, count, record};

fn users() -> Table {
    Table::new(
        "users",
        Shape::new()
            .column("id", Column::integer().primary_key())
            .column("name", Column::text())
            .column("created_at", Column::timestamptz().name("createdAt")),
    )
}

fn posts() -> Table {
    Table::new(
        "posts",
        Shape::new()
            .column("id", Column::integer().primary_key())
            .column("user_id", Column::integer())
            .column("title", Column::text()),
    )
}

fn text(query: &Query) -> String {
    query.to_sql().unwrap().text
}

fn validation(query: &Query) -> String {
    match query.to_sql() {
        Err(QbError::Validation(message)) => message,
        other => panic!("expected a validation error, got {other:?}"),
    }
}

fn placeholder_count(text: &str) -> usize {
    let bytes = text.as_bytes();
    bytes
        .windows(2)
        .filter(|w| w[0] == b'$' && w[1].is_ascii_digit())
        .count()
}

// ==================== SELECT ====================

#[test]
fn select_where_literal() {
    let query = Query::table("table")
        .select(["id", "name"])
        .where_eq("foo", "bar");
    let compiled = query.to_sql().unwrap();
    assert_eq!(
        compiled.text,
        r#"SELECT "table"."id", "table"."name" FROM "table" WHERE "table"."foo" = $1"#
    );
    assert_eq!(compiled.values, vec![Value::from("bar")]);
}

#[test]
fn default_columns_alias_renamed() {
    assert_eq!(
        text(&users().query()),
        r#"SELECT "users"."id", "users"."name", "users"."createdAt" AS "created_at" FROM "users""#
    );
    assert_eq!(text(&posts().query()), r#"SELECT "posts".* FROM "posts""#);
}

#[test]
fn filter_uses_db_name() {
    let compiled = users()
        .query()
        .select(["id"])
        .where_op("created_at", Op::Gt, 5)
        .to_sql()
        .unwrap();
    assert_eq!(
        compiled.text,
        r#"SELECT "users"."id" FROM "users" WHERE "users"."createdAt" > $1"#
    );
}

#[test]
fn find_adds_limit_one() {
    let compiled = posts().query().find(7).to_sql().unwrap();
    assert_eq!(
        compiled.text,
        r#"SELECT "posts".* FROM "posts" WHERE "posts"."id" = $1 LIMIT 1"#
    );
    assert_eq!(compiled.values, vec![Value::Int(7)]);
}

#[test]
fn find_with_null_key_is_rejected() {
    let query = posts().query().find(Value::Null);
    assert_eq!(
        validation(&query),
        "find on `posts` requires a non-null `id` value"
    );
}

#[test]
fn placeholders_follow_sub_queries() {
    let published = Query::table("posts")
        .select(["user_id"])
        .where_eq("published", true);
    let compiled = Query::table("users")
        .where_eq("role", "admin")
        .where_in_query("id", published)
        .where_eq("active", false)
        .to_sql()
        .unwrap();

    assert_eq!(
        compiled.text,
        r#"SELECT "users".* FROM "users" WHERE "users"."role" = $1 AND "users"."id" IN (SELECT "posts"."user_id" FROM "posts" WHERE "posts"."published" = $2) AND "users"."active" = $3"#
    );
    assert_eq!(
        compiled.values,
        vec![Value::from("admin"), Value::Bool(true), Value::Bool(false)]
    );
    assert_eq!(placeholder_count(&compiled.text), compiled.values.len());
}

#[test]
fn merged_filters_are_anded_in_order() {
    let left = Query::table("t").where_record(&record! { "id" => 1, "name" => "name" });
    let right = Query::table("t").where_eq("id", 2);
    let compiled = left.merge(&right).to_sql().unwrap();

    assert_eq!(
        compiled.text,
        r#"SELECT "t".* FROM "t" WHERE "t"."id" = $1 AND "t"."name" = $2 AND "t"."id" = $3"#
    );
    assert_eq!(
        compiled.values,
        vec![Value::Int(1), Value::from("name"), Value::Int(2)]
    );
}

#[test]
fn null_equality_becomes_is_null() {
    assert_eq!(
        text(&Query::table("t").where_eq("a", Value::Null).where_ne("b", Value::Null)),
        r#"SELECT "t".* FROM "t" WHERE "t"."a" IS NULL AND "t"."b" IS NOT NULL"#
    );
}

#[test]
fn empty_in_lists() {
    assert_eq!(
        text(&Query::table("t").where_in("a", Vec::<i32>::new())),
        r#"SELECT "t".* FROM "t" WHERE false"#
    );
    assert_eq!(
        text(&Query::table("t").where_not_in("a", Vec::<i32>::new())),
        r#"SELECT "t".* FROM "t" WHERE true"#
    );
}

// ==================== WHERE parenthesization ====================

#[test]
fn or_groups_are_parenthesized() {
    let query = Query::table("t")
        .where_eq("a", 1)
        .or(|w| w.eq("b", 2).eq("c", 3));
    assert_eq!(
        text(&query),
        r#"SELECT "t".* FROM "t" WHERE "t"."a" = $1 OR ("t"."b" = $2 AND "t"."c" = $3)"#
    );
}

#[test]
fn scopes_are_anded_after_or_groups() {
    let table = Table::new("t", Shape::new()).soft_delete("deleted_at");
    let query = table.query().where_eq("a", 1).or(|w| w.eq("b", 2));
    assert_eq!(
        text(&query),
        r#"SELECT "t".* FROM "t" WHERE ("t"."a" = $1 OR "t"."b" = $2) AND "t"."deleted_at" IS NULL"#
    );
    assert_eq!(
        text(&table.query().include_deleted().where_eq("a", 1)),
        r#"SELECT "t".* FROM "t" WHERE "t"."a" = $1"#
    );
}

#[test]
fn nested_groups_and_negation() {
    let query = Query::table("t")
        .where_eq("a", 1)
        .where_group(|w| w.eq("b", 2).or(|w| w.eq("c", 3)))
        .where_not(|w| w.eq("d", 4));
    assert_eq!(
        text(&query),
        r#"SELECT "t".* FROM "t" WHERE "t"."a" = $1 AND ("t"."b" = $2 OR "t"."c" = $3) AND NOT ("t"."d" = $4)"#
    );
}

#[test]
fn raw_predicates_parenthesized_among_siblings() {
    assert_eq!(
        text(&Query::table("t").where_raw(sql("x > 1"))),
        r#"SELECT "t".* FROM "t" WHERE x > 1"#
    );
    assert_eq!(
        text(&Query::table("t").where_raw(sql("x > 1 OR y")).where_eq("a", 1)),
        r#"SELECT "t".* FROM "t" WHERE (x > 1 OR y) AND "t"."a" = $1"#
    );
}

#[test]
fn none_adds_false_guard() {
    assert_eq!(
        text(&Query::table("t").where_eq("a", 1).none()),
        r#"SELECT "t".* FROM "t" WHERE "t"."a" = $1 AND false"#
    );
}

// ==================== Raw SQL ====================

#[test]
fn raw_named_variables() {
    let compiled = Query::table("t")
        .where_raw(RawSql::named(r#""age" > $min AND "age" < $min + 10"#).var("min", 18))
        .to_sql()
        .unwrap();
    assert_eq!(
        compiled.text,
        r#"SELECT "t".* FROM "t" WHERE "age" > $1 AND "age" < $1 + 10"#
    );
    assert_eq!(compiled.values, vec![Value::Int(18)]);
}

#[test]
fn raw_variable_errors() {
    let missing = Query::table("t").where_raw(RawSql::named("a = $missing"));
    assert_eq!(validation(&missing), "Query variable `missing` is not provided");

    let unused = Query::table("t").where_raw(RawSql::named("a = 1").var("extra", 1));
    assert_eq!(validation(&unused), "Query variable `extra` is unused");
}

#[test]
fn raw_bound_values_share_numbering() {
    let mut fragment = sql("\"score\" BETWEEN ");
    fragment.push_bind(1).push(" AND ").push_bind(9);
    let compiled = Query::table("t")
        .where_eq("a", "x")
        .where_raw(fragment)
        .to_sql()
        .unwrap();
    assert_eq!(
        compiled.text,
        r#"SELECT "t".* FROM "t" WHERE "t"."a" = $1 AND ("score" BETWEEN $2 AND $3)"#
    );
    assert_eq!(placeholder_count(&compiled.text), compiled.values.len());
}

// ==================== Joins ====================

#[test]
fn join_resolves_columns_of_joined_tables() {
    let query = posts()
        .query()
        .select(["title", "users.name", "created_at"])
        .join(&users(), |on| on.on("users.id", "posts.user_id"));
    assert_eq!(
        text(&query),
        r#"SELECT "posts"."title", "users"."name", "users"."createdAt" AS "created_at" FROM "posts" JOIN "users" ON "users"."id" = "posts"."user_id""#
    );
}

#[test]
fn ambiguous_and_unknown_columns() {
    let authors = Table::new("authors", Shape::new().column("name", Column::text()));
    let query = posts()
        .query()
        .select(["name"])
        .join(&users(), |on| on.on("users.id", "posts.user_id"))
        .left_join(&authors, |on| on.on("authors.name", "users.name"));
    assert_eq!(validation(&query), "Column `name` is ambiguous");

    let query = posts().query().select(["nope"]);
    assert_eq!(validation(&query), "Column `nope` not found");
}

#[test]
fn lateral_join_without_condition() {
    let latest = Query::table("posts").select(["id"]).order_desc("id").limit(1);
    let query = Query::table("users")
        .select(["id"])
        .join_query(JoinKind::Lateral, latest, "latest", |on| on);
    assert_eq!(
        text(&query),
        r#"SELECT "users"."id" FROM "users" JOIN LATERAL (SELECT "posts"."id" FROM "posts" ORDER BY "posts"."id" DESC LIMIT 1) AS "latest" ON true"#
    );
}

#[test]
fn undeclared_own_table_keeps_unqualified_names() {
    let query = Query::table("posts")
        .join(&users(), |on| on.on("users.id", "posts.user_id"))
        .select(["name", "users.name"]);
    assert_eq!(
        text(&query),
        r#"SELECT "posts"."name", "users"."name" FROM "posts" JOIN "users" ON "users"."id" = "posts"."user_id""#
    );
}

// ==================== FROM / CTE / set operations ====================

#[test]
fn derived_table_exposes_logical_keys() {
    let query = Query::empty()
        .from_query(users().query().where_eq("name", "a"))
        .select(["created_at"]);
    assert_eq!(
        text(&query),
        r#"SELECT "users"."created_at" FROM (SELECT "users"."id", "users"."name", "users"."createdAt" AS "created_at" FROM "users" WHERE "users"."name" = $1) AS "users""#
    );
}

#[test]
fn cte_is_selectable() {
    let query = Query::table("active")
        .with("active", Query::table("users").where_eq("active", true))
        .select(["id"]);
    let compiled = query.to_sql().unwrap();
    assert_eq!(
        compiled.text,
        r#"WITH "active" AS (SELECT "users".* FROM "users" WHERE "users"."active" = $1) SELECT "active"."id" FROM "active""#
    );
    assert_eq!(compiled.values, vec![Value::Bool(true)]);
}

#[test]
fn set_operands_with_limit_are_parenthesized() {
    let query = Query::table("a")
        .select(["id"])
        .union_all(Query::table("b").select(["id"]).limit(5));
    assert_eq!(
        text(&query),
        r#"SELECT "a"."id" FROM "a" UNION ALL (SELECT "b"."id" FROM "b" LIMIT 5)"#
    );
}

#[test]
fn single_row_operands_keep_their_limit_inside() {
    let query = Query::table("a").union(Query::table("b").take());
    assert_eq!(
        text(&query),
        r#"SELECT "a".* FROM "a" UNION (SELECT "b".* FROM "b" LIMIT 1)"#
    );
}

#[test]
fn aggregates_group_and_having() {
    let query = Query::table("posts")
        .select(["user_id"])
        .select_as(count(), "total")
        .group(["user_id"])
        .having_op(count(), Op::Gt, 1)
        .order_desc("total");
    assert_eq!(
        text(&query),
        r#"SELECT "posts"."user_id", count(*) AS "total" FROM "posts" GROUP BY "posts"."user_id" HAVING count(*) > $1 ORDER BY "total" DESC"#
    );
}

#[test]
fn count_and_exists_rewrites() {
    assert_eq!(
        text(&Query::table("t").where_eq("a", 1).order("a").into_count()),
        r#"SELECT count(*) FROM "t" WHERE "t"."a" = $1"#
    );
    assert_eq!(
        text(&Query::table("t").limit(10).into_count()),
        r#"SELECT count(*) FROM (SELECT 1 FROM "t" LIMIT 10) AS "t""#
    );
    assert_eq!(
        text(&Query::table("t").select(["a"]).into_exists()),
        r#"SELECT true FROM "t" LIMIT 1"#
    );
}

#[test]
fn locking_clause() {
    let query = Query::table("jobs")
        .where_eq("state", "queued")
        .limit(1)
        .for_update()
        .skip_locked();
    assert_eq!(
        text(&query),
        r#"SELECT "jobs".* FROM "jobs" WHERE "jobs"."state" = $1 LIMIT 1 FOR UPDATE SKIP LOCKED"#
    );
}

#[test]
fn schema_qualification() {
    let query = Table::new("users", Shape::new()).schema("app").query();
    assert_eq!(text(&query), r#"SELECT "users".* FROM "app"."users""#);
    assert_eq!(
        query.to_sql_in("app").unwrap().text,
        r#"SELECT "users".* FROM "users""#
    );
}

// ==================== INSERT ====================

fn items() -> Table {
    Table::new(
        "items",
        Shape::new()
            .column("id", Column::integer().primary_key())
            .column("name", Column::text())
            .column("status", Column::text().default_value("new"))
            .column("created_at", Column::timestamptz().default_raw(sql("now()"))),
    )
}

#[test]
fn insert_applies_defaults() {
    let compiled = items()
        .query()
        .insert(record! { "name" => "a" })
        .to_sql()
        .unwrap();
    assert_eq!(
        compiled.text,
        r#"INSERT INTO "items" ("name", "status", "created_at") VALUES ($1, $2, now())"#
    );
    assert_eq!(compiled.values, vec![Value::from("a"), Value::from("new")]);
}

#[test]
fn create_returns_the_row() {
    assert_eq!(
        text(&items().query().create(record! { "name" => "a", "status" => "old" })),
        r#"INSERT INTO "items" ("name", "status", "created_at") VALUES ($1, $2, now()) RETURNING *"#
    );
}

#[test]
fn insert_many_fills_missing_keys_with_default() {
    let query = Query::table("t").insert_many(vec![record! { "a" => 1 }, record! { "b" => 2 }]);
    assert_eq!(
        text(&query),
        r#"INSERT INTO "t" ("a", "b") VALUES ($1, DEFAULT), (DEFAULT, $2)"#
    );
}

#[test]
fn insert_without_columns_uses_default_values() {
    assert_eq!(
        text(&Query::table("logs").insert(Record::new())),
        r#"INSERT INTO "logs" DEFAULT VALUES"#
    );
}

#[test]
fn insert_encodes_values() {
    let table = Table::new(
        "t",
        Shape::new().column(
            "tags",
            Column::jsonb().encode(|v| Value::Json(v.to_json())),
        ),
    );
    let compiled = table
        .query()
        .insert(record! { "tags" => "x" })
        .to_sql()
        .unwrap();
    assert_eq!(compiled.values, vec![Value::Json(serde_json::json!("x"))]);
}

#[test]
fn on_conflict_merge_and_ignore() {
    let merge = Query::table("t")
        .insert(record! { "id" => 1, "name" => "a" })
        .on_conflict(["id"])
        .merge_conflict();
    assert_eq!(
        text(&merge),
        r#"INSERT INTO "t" ("id", "name") VALUES ($1, $2) ON CONFLICT ("id") DO UPDATE SET "name" = excluded."name""#
    );

    let ignore = Query::table("t")
        .insert(record! { "id" => 1 })
        .on_conflict(Vec::<String>::new())
        .ignore();
    assert_eq!(
        text(&ignore),
        r#"INSERT INTO "t" ("id") VALUES ($1) ON CONFLICT DO NOTHING"#
    );
}

#[test]
fn read_only_columns_are_rejected() {
    let table = Table::new(
        "t",
        Shape::new()
            .column("id", Column::integer().primary_key().read_only())
            .column("name", Column::text()),
    );
    let query = table.query().insert(record! { "id" => 1, "name" => "a" });
    assert_eq!(validation(&query), "Column `id` is read-only");
}

// ==================== UPDATE / DELETE ====================

#[test]
fn update_binds_set_values_first() {
    let compiled = Query::table("t")
        .where_eq("id", 1)
        .update(record! { "name" => "b" })
        .increment("n", 2)
        .to_sql()
        .unwrap();
    assert_eq!(
        compiled.text,
        r#"UPDATE "t" SET "name" = $1, "n" = "t"."n" + $2 WHERE "t"."id" = $3"#
    );
    assert_eq!(
        compiled.values,
        vec![Value::from("b"), Value::Int(2), Value::Int(1)]
    );
}

#[test]
fn unfiltered_mutations_are_refused() {
    let update = Query::table("t").update(record! { "name" => "b" });
    assert_eq!(
        validation(&update),
        "Refusing to update `t` without a filter; call all_rows() to affect every row"
    );
    assert_eq!(
        text(&Query::table("t").all_rows().update(record! { "name" => "b" })),
        r#"UPDATE "t" SET "name" = $1"#
    );
    assert!(Query::table("t").delete().to_sql().is_err());
}

#[test]
fn soft_delete_becomes_update() {
    let table = Table::new(
        "t",
        Shape::new()
            .column("id", Column::integer().primary_key())
            .column("deleted_at", Column::timestamptz().nullable()),
    )
    .soft_delete("deleted_at");

    assert_eq!(
        text(&table.query().where_eq("id", 1).delete()),
        r#"UPDATE "t" SET "deleted_at" = now() WHERE "t"."id" = $1 AND "t"."deleted_at" IS NULL"#
    );
    assert_eq!(
        text(&table.query().include_deleted().where_eq("id", 1).hard_delete()),
        r#"DELETE FROM "t" WHERE "t"."id" = $1"#
    );
}

#[test]
fn delete_with_returning() {
    assert_eq!(
        text(&Query::table("t").where_eq("id", 1).delete().returning(["id"])),
        r#"DELETE FROM "t" WHERE "t"."id" = $1 RETURNING "t"."id""#
    );
}

#[test]
fn truncate_options() {
    assert_eq!(
        text(&Query::table("t").truncate().restart_identity().cascade()),
        r#"TRUNCATE "t" RESTART IDENTITY CASCADE"#
    );
}

#[test]
fn column_info_binds_table_and_column() {
    let compiled = users().query().column_info(Some("created_at")).to_sql().unwrap();
    assert!(compiled.text.contains(r#""table_schema" = current_schema()"#));
    assert!(compiled.text.ends_with(r#"ORDER BY "ordinal_position""#));
    assert_eq!(
        compiled.values,
        vec![Value::from("users"), Value::from("createdAt")]
    );
}

#[test]
fn expression_helpers() {
    let query = Query::table("t").select_as(col("a").add(col("b")).cast("bigint"), "total");
    assert_eq!(
        text(&query),
        r#"SELECT ("t"."a" + "t"."b")::bigint AS "total" FROM "t""#
    );
}
