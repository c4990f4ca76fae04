mod format;
mod session;
mod stream;

pub(crate) use format::NumberFormat;
pub(crate) use session::{SessionTableOptions, output_session_json, print_session_table};
pub(crate) use stream::{
    StreamTableOptions, output_groups_json, output_records_json, print_group_table,
    print_stream_summary, status_text,
};
