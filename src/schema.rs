diesel::table! {
    datasets (id) {
        id -> Text,
        table_name -> Text,
        display_name -> Text,
        description -> Text,
        column_types -> Text,
        row_count -> BigInt,
        column_count -> Integer,
        original_filename -> Text,
        stored_file_path -> Text,
        owner -> Text,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}
