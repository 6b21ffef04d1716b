mod batch_scenarios;
mod commander_scenarios;
mod test_helpers;
