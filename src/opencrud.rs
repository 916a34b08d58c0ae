//! OpenCRUD naming conventions shared by the extension synthesizer, the
//! resolver factory and the filter pushdown translator.

/// Argument carrying a record filter on every generated query.
pub const FILTER_ARG: &str = "where";

/// Argument carrying a sort order on list queries.
pub const ORDER_BY_ARG: &str = "orderBy";

/// Pagination arguments every list field accepts, as `(name, SDL type)`.
pub const PAGINATION_ARGS: &[(&str, &str)] = &[
    ("skip", "Int"),
    ("after", "String"),
    ("before", "String"),
    ("first", "Int"),
    ("last", "Int"),
];

/// Suffix turning a filter field into a set-membership constraint.
pub const MEMBERSHIP_SUFFIX: &str = "_in";

/// Suffix of the scalar column conventionally holding a foreign key.
pub const KEY_SUFFIX: &str = "_id";

/// Key field assumed on a target type when none is configured.
pub const DEFAULT_KEY_FIELD: &str = "id";

/// Conventional name of the single-record query for a type: `User` -> `user`.
pub fn single_query_name(type_name: &str) -> String {
    type_name.to_lowercase()
}

/// Conventional name of the list query for a type: `User` -> `users`.
pub fn list_query_name(type_name: &str) -> String {
    format!("{}s", type_name.to_lowercase())
}

/// Filter input type for a record type: `Object` -> `ObjectWhereInput`.
pub fn where_input_name(type_name: &str) -> String {
    format!("{type_name}WhereInput")
}

/// Sort order input type for a record type: `Object` -> `ObjectOrderByInput`.
pub fn order_by_input_name(type_name: &str) -> String {
    format!("{type_name}OrderByInput")
}

/// Default key column for a relation field: `owner` -> `owner_id`.
pub fn default_local_key(field: &str) -> String {
    format!("{field}{KEY_SUFFIX}")
}

/// Membership filter key for a column: `owner_id` -> `owner_id_in`.
pub fn membership_key(field: &str) -> String {
    format!("{field}{MEMBERSHIP_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_names_follow_the_lowercase_convention() {
        assert_eq!(single_query_name("User"), "user");
        assert_eq!(list_query_name("User"), "users");
        assert_eq!(single_query_name("Object"), "object");
        assert_eq!(list_query_name("Object"), "objects");
    }

    #[test]
    fn derived_filter_names() {
        assert_eq!(where_input_name("Object"), "ObjectWhereInput");
        assert_eq!(order_by_input_name("Object"), "ObjectOrderByInput");
        assert_eq!(default_local_key("owner"), "owner_id");
        assert_eq!(membership_key("owner_id"), "owner_id_in");
    }
}
