mod budget_test;
mod checkpoint_test;
mod classification_test;
mod scd2_test;
mod upsert_test;
