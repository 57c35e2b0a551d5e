mod tests_migration;
