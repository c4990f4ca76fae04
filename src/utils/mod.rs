pub(crate) mod jq;
pub(crate) mod timezone;

pub(crate) use jq::filter_json;
pub(crate) use timezone::Timezone;
