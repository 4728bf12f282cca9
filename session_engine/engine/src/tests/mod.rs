mod support;

mod audit_log_tests;
