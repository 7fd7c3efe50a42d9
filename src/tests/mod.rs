mod test_circuit_breaker;
