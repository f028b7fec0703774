use std::collections::BTreeMap;

use glove_routes::{Route, RouteTrie};

// Trimmed-down version of a real exchange rate-limit table: enough shapes to
// exercise shared prefixes, parameters and wildcards together.
fn exchange_routes() -> Vec<Route> {
    let table: [(&str, &str, u32); 38] = [
        ("GET", "/api/v5/account/balance", 120),
        ("GET", "/api/v5/account/positions", 120),
        ("GET", "/api/v5/account/positions-history", 6000),
        ("GET", "/api/v5/account/bills", 120),
        ("GET", "/api/v5/account/bills-archive", 240),
        ("GET", "/api/v5/account/config", 240),
        ("POST", "/api/v5/account/set-position-mode", 240),
        ("POST", "/api/v5/account/set-leverage", 60),
        ("GET", "/api/v5/account/max-size", 60),
        ("GET", "/api/v5/account/max-avail-size", 60),
        ("POST", "/api/v5/account/position/margin-balance", 60),
        ("GET", "/api/v5/account/leverage-info", 60),
        ("GET", "/api/v5/account/max-loan", 60),
        ("GET", "/api/v5/account/trade-fee", 240),
        ("GET", "/api/v5/account/interest-accrued", 240),
        ("GET", "/api/v5/account/interest-rate", 240),
        ("POST", "/api/v5/trade/order", 20),
        ("POST", "/api/v5/trade/batch-orders", 80),
        ("POST", "/api/v5/trade/cancel-order", 20),
        ("POST", "/api/v5/trade/cancel-batch-orders", 80),
        ("POST", "/api/v5/trade/amend-order", 20),
        ("POST", "/api/v5/trade/close-position", 60),
        ("GET", "/api/v5/trade/order", 20),
        ("GET", "/api/v5/trade/orders-pending", 20),
        ("GET", "/api/v5/trade/orders-history", 30),
        ("GET", "/api/v5/trade/orders-history-archive", 60),
        ("GET", "/api/v5/trade/fills", 20),
        ("GET", "/api/v5/trade/fills-history", 120),
        ("POST", "/api/v5/trade/order-algo", 60),
        ("POST", "/api/v5/trade/cancel-algos", 60),
        ("GET", "/api/v5/market/tickers", 60),
        ("GET", "/api/v5/market/ticker", 60),
        ("GET", "/api/v5/market/books", 60),
        ("GET", "/api/v5/users/subaccount/list", 600),
        ("GET", "/v1/entities/:entity_id/assets", 1),
        ("GET", "/v1/entities/:entity_id/payment-methods/:payment_method_id", 2),
        ("GET", "/v1/entities/:entity_id/payment-methods/*", 3),
        ("GET", "/files/*", 5),
    ];

    table
        .into_iter()
        .map(|(method, route, cost)| Route::new(method, route, cost))
        .collect()
}

fn build_trie(routes: &[Route]) -> RouteTrie {
    let mut trie = RouteTrie::new();
    for route in routes {
        trie.insert(&route.method, &route.route, route.cost)
            .expect("fixture route must validate");
    }
    trie
}

fn index_by_route(routes: &[Route]) -> BTreeMap<(String, String), u32> {
    routes
        .iter()
        .map(|route| ((route.method.clone(), route.route.clone()), route.cost))
        .collect()
}

// A dumped template drops the wildcard marker along with any trailing slash;
// parameters come back verbatim.
fn dumped_form(route: &str) -> String {
    let route = route.strip_suffix('*').unwrap_or(route);
    let route = route.strip_suffix('/').unwrap_or(route);
    route.to_string()
}

#[test]
fn dump_round_trips_the_route_table() {
    let routes = exchange_routes();
    let trie = build_trie(&routes);

    let expected: BTreeMap<(String, String), u32> = routes
        .iter()
        .map(|route| {
            (
                (route.method.clone(), dumped_form(&route.route)),
                route.cost,
            )
        })
        .collect();
    let actual = index_by_route(&trie.dump());

    assert_eq!(actual, expected);
}

#[test]
fn dump_is_sorted_by_method_and_route() {
    let trie = build_trie(&exchange_routes());
    let dumped = trie.dump();

    let mut sorted = dumped.clone();
    sorted.sort_by(|left, right| {
        (&left.method, &left.route).cmp(&(&right.method, &right.route))
    });
    assert_eq!(dumped, sorted);
}

#[test]
fn dump_omits_zero_cost_routes() {
    let mut trie = build_trie(&exchange_routes());
    trie.insert("GET", "/internal/healthcheck", 0)
        .expect("insert");

    let dumped = trie.dump();
    assert!(dumped
        .iter()
        .all(|route| route.route != "/internal/healthcheck"));
}

#[test]
fn every_literal_route_is_found_at_its_cost() {
    let routes = exchange_routes();
    let trie = build_trie(&routes);

    for route in &routes {
        if route.route.contains(':') || route.route.contains('*') {
            continue;
        }
        assert_eq!(
            trie.cost(&route.method, &route.route),
            route.cost,
            "method: {}, route: {}",
            route.method,
            route.route,
        );
    }
}

#[test]
fn parameters_and_wildcards_resolve() {
    let trie = build_trie(&exchange_routes());

    assert_eq!(trie.cost("GET", "/v1/entities/42/assets"), 1);
    assert_eq!(
        trie.cost("GET", "/v1/entities/42/payment-methods/pm-1"),
        2
    );
    assert_eq!(
        trie.cost("GET", "/v1/entities/42/payment-methods/pm-1/verify"),
        3
    );
    assert_eq!(trie.cost("GET", "/files/reports/2023/q4.pdf"), 5);
    assert_eq!(trie.cost("GET", "/api/v5/unknown"), 0);
    assert_eq!(trie.cost("DELETE", "/api/v5/trade/order"), 0);
}
