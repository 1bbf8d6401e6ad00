pub mod query_descriptor;
