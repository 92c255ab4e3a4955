use tabmeta::meta::{sort_schemas, sort_tables, SchemaMeta, TableMeta};

fn table(name: &str, index: Option<i64>) -> TableMeta {
    TableMeta {
        index,
        ..TableMeta::named(name)
    }
}

fn schema(name: &str, index: Option<i64>) -> SchemaMeta {
    SchemaMeta {
        index,
        ..SchemaMeta::named(name)
    }
}

#[test]
fn test_unindexed_tables_sort_by_name() {
    // a reader reporting ["b", "a"] with no declared index renders
    // alphabetically after the ordering step
    let mut tables = vec![table("b", None), table("a", None)];
    sort_tables(&mut tables);
    let names: Vec<_> = tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["a", "b"]);
}

#[test]
fn test_declared_index_wins_over_name() {
    let mut schemas = vec![
        schema("alpha", None),
        schema("zulu", Some(1)),
        schema("mike", Some(2)),
    ];
    sort_schemas(&mut schemas);
    let names: Vec<_> = schemas.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["zulu", "mike", "alpha"]);
}

#[test]
fn test_sort_is_stable_across_repeats() {
    let unsorted = vec![
        table("c", Some(7)),
        table("a", None),
        table("c", Some(7)),
        table("b", None),
    ];
    let mut first = unsorted.clone();
    sort_tables(&mut first);
    let mut second = first.clone();
    sort_tables(&mut second);
    assert_eq!(first, second);

    // feeding the original unsorted list again gives the same order
    let mut third = unsorted;
    sort_tables(&mut third);
    assert_eq!(first, third);
}

#[test]
fn test_negative_and_large_indexes() {
    let mut tables = vec![table("late", Some(10)), table("early", Some(-3))];
    sort_tables(&mut tables);
    assert_eq!(tables[0].name, "early");
}
