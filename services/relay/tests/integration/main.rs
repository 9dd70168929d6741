
mod ingest_test;
mod pipeline_test;
mod publish_test;
