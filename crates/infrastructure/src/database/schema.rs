// Catalog schema, as left by the latest embedded migration.
diesel::table! {
    torrents (id) {
        id -> Integer,
        name -> Text,              // Basename of the .torrent file
        created_at -> Timestamp,
        updated_at -> Timestamp,
        state -> Text,             // init, ready, active, done, cancelled
        retry_count -> Integer,
        failed -> Bool,
        error_msg -> Nullable<Text>,
        invalid -> Bool,           // Unparseable .torrent
        purged -> Bool,            // Media rows deleted
    }
}

diesel::table! {
    media_files (id) {
        id -> Integer,
        torrent_id -> Integer,
        filename -> Text,          // Path within the torrent, or basename once staged
        file_ext -> Text,
        file_path -> Nullable<Text>, // Directory currently holding the file
        size -> BigInt,
        compressed -> Bool,
        synced -> Bool,
        missing -> Bool,
        skipped -> Bool,
        error_msg -> Nullable<Text>,
        total_time -> Nullable<Double>,
    }
}

diesel::table! {
    app_state (id) {
        id -> Integer,
        name -> Text,
        value_type -> Text,        // int, bool, datetime, string, none
        int_value -> Nullable<BigInt>,
        bool_value -> Nullable<Bool>,
        datetime_value -> Nullable<Timestamp>,
        text_value -> Nullable<Text>,
    }
}

diesel::joinable!(media_files -> torrents (torrent_id));

diesel::allow_tables_to_appear_in_same_query!(torrents, media_files, app_state,);
