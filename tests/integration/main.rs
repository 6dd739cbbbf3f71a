//! Integration tests: full jobs against an in-process compute engine stub.

mod helpers;
mod job_test;
