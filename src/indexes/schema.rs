// Lexical (full-text) schema for this daemon's single repository. There is
// no `repo_ref` / `repo_name` field: one daemon serves exactly one
// repository, so there is nothing to disambiguate a document's owning repo
// from.

use tantivy::schema::{
    BytesOptions, Field, IndexRecordOption, Schema, SchemaBuilder, TextFieldIndexing, TextOptions,
    FAST, STORED, STRING,
};

#[derive(Clone)]
pub struct File {
    pub schema: Schema,

    pub unique_hash: Field,
    pub relative_path: Field,
    pub content: Field,
    pub line_end_indices: Field,

    pub lang: Field,
    pub avg_line_length: Field,
    pub last_commit_unix_seconds: Field,
    pub commit_hash: Field,
    pub branches: Field,
}

impl File {
    pub fn new() -> Self {
        let mut builder = SchemaBuilder::new();
        let trigram = TextOptions::default().set_stored().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("default")
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        );

        let unique_hash = builder.add_text_field("unique_hash", STRING | STORED);
        let relative_path = builder.add_text_field("relative_path", trigram.clone());
        let content = builder.add_text_field("content", trigram.clone());
        let line_end_indices =
            builder.add_bytes_field("line_end_indices", BytesOptions::default().set_stored());

        let branches = builder.add_text_field("branches", trigram);
        let lang = builder.add_bytes_field("lang", BytesOptions::default().set_stored().set_indexed() | FAST);
        let avg_line_length = builder.add_f64_field("line_length", FAST);
        let last_commit_unix_seconds = builder.add_i64_field("last_commit_unix_seconds", FAST);
        let commit_hash = builder.add_text_field("commit_hash", STRING);

        Self {
            schema: builder.build(),
            unique_hash,
            relative_path,
            content,
            line_end_indices,
            lang,
            avg_line_length,
            last_commit_unix_seconds,
            commit_hash,
            branches,
        }
    }
}

impl Default for File {
    fn default() -> Self {
        Self::new()
    }
}
