//! ControlPlane (C11): the HTTP surface over `PartitionTable` and
//! `ConfigStore`.
//!
//! A raw `TcpListener` accept loop, one `hyper::server::conn::http1`
//! connection per socket, and a single `service_fn` dispatching on method
//! and path rather than a routing framework.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use laser_config::{
    ClusterInfo, DatabaseTableSchemaData, ManualOverrides, NodeConfigList, RocksdbNodeConfigs,
    TableConfigList, TrafficRestrictionData,
};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::{self, ConfigStore};
use crate::metrics;
use crate::partition_table::PartitionTable;

const CODE_OK: u32 = 0;
const CODE_BAD_REQUEST: u32 = 400;
const CODE_NOT_FOUND: u32 = 404;

/// Accepts connections on `addr` until the process shuts down, serving one
/// `hyper` connection per socket on its own spawned task.
pub async fn serve(addr: SocketAddr, partitions: Arc<PartitionTable>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "control plane listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let partitions = partitions.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let partitions = partitions.clone();
                async move { Ok::<_, Infallible>(route(req, partitions).await) }
            });
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                warn!(%err, "control plane connection error");
            }
        });
    }
}

async fn route(req: Request<Incoming>, partitions: Arc<PartitionTable>) -> Response<Full<Bytes>> {
    let config = config::store();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match (method, path.as_str()) {
        (Method::GET, "/healthz") => healthz(),
        (Method::GET, "/metrics") => metrics_response(&partitions),
        (Method::POST, "/update/base") => {
            let params = query_params(&req);
            update_base(&partitions, &params)
        }
        (Method::POST, "/update/delta") => {
            let params = query_params(&req);
            update_delta(&partitions, &params)
        }
        (Method::POST, "/update/base_replication") => {
            let params = query_params(&req);
            update_base_replication(&partitions, &params)
        }
        (Method::GET, "/db/meta") => {
            let params = query_params(&req);
            db_meta(&partitions, &params)
        }
        (Method::GET, "/shard/list") => shard_list(&partitions, config),
        (Method::POST, "/shard/unavailable") => shard_unavailable(&partitions, req).await,
        (Method::POST, "/clean/partitions") => clean_partitions(&partitions, req).await,
        (Method::POST, "/monitor/switch") => {
            let params = query_params(&req);
            monitor_switch(&partitions, &params)
        }
        (Method::POST, "/update/configs") => update_configs(config, req).await,
        _ => error_json(CODE_NOT_FOUND, "no such endpoint"),
    }
}

fn query_params(req: &Request<Incoming>) -> HashMap<String, String> {
    req.uri()
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

fn json_response(status: StatusCode, body: impl Serialize) -> Response<Full<Bytes>> {
    let payload = serde_json::to_vec(&body).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(payload)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("{}"))))
}

fn ok_json(data: Value) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        serde_json::json!({"Code": CODE_OK, "Error": "", "Data": data}),
    )
}

fn error_json(code: u32, message: impl Into<String>) -> Response<Full<Bytes>> {
    let status = if code == CODE_NOT_FOUND {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::BAD_REQUEST
    };
    json_response(
        status,
        serde_json::json!({"Code": code, "Error": message.into(), "Data": Value::Null}),
    )
}

fn healthz() -> Response<Full<Bytes>> {
    Response::builder()
        .header(hyper::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .status(StatusCode::OK)
        .body(Full::new(Bytes::from("up")))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("up"))))
}

fn metrics_response(partitions: &PartitionTable) -> Response<Full<Bytes>> {
    let body = metrics::render(partitions);
    Response::builder()
        .header(
            hyper::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("metrics unavailable"))))
}

fn require<'a>(params: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    params.get(name).map(|s| s.as_str())
}

fn update_base(partitions: &PartitionTable, params: &HashMap<String, String>) -> Response<Full<Bytes>> {
    let (Some(db), Some(table), Some(version)) = (
        require(params, "database_name"),
        require(params, "table_name"),
        require(params, "version"),
    ) else {
        return error_json(CODE_BAD_REQUEST, "missing database_name/table_name/version");
    };
    partitions.trigger_base(db, table, version);
    ok_json(Value::Null)
}

fn update_delta(partitions: &PartitionTable, params: &HashMap<String, String>) -> Response<Full<Bytes>> {
    let (Some(db), Some(table), Some(version)) = (
        require(params, "database_name"),
        require(params, "table_name"),
        require(params, "version"),
    ) else {
        return error_json(CODE_BAD_REQUEST, "missing database_name/table_name/version");
    };
    let deltas: Vec<String> = require(params, "delta_versions")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    partitions.trigger_delta(db, table, version, &deltas);
    ok_json(Value::Null)
}

fn update_base_replication(
    partitions: &PartitionTable,
    params: &HashMap<String, String>,
) -> Response<Full<Bytes>> {
    let (Some(db), Some(table)) = (require(params, "database_name"), require(params, "table_name"))
    else {
        return error_json(CODE_BAD_REQUEST, "missing database_name/table_name");
    };
    let triggered = partitions.trigger_base_data_replication(db, table);
    ok_json(serde_json::to_value(triggered).unwrap_or(Value::Null))
}

fn db_meta(partitions: &PartitionTable, params: &HashMap<String, String>) -> Response<Full<Bytes>> {
    let (Some(db), Some(table)) = (require(params, "database_name"), require(params, "table_name"))
    else {
        return error_json(CODE_BAD_REQUEST, "missing database_name/table_name");
    };
    let info = partitions.get_table_meta_info(db, table);
    ok_json(serde_json::to_value(info).unwrap_or(Value::Null))
}

fn shard_list(partitions: &PartitionTable, config: &ConfigStore) -> Response<Full<Bytes>> {
    let shards = partitions.get_shard_meta_info(config);
    ok_json(serde_json::to_value(shards).unwrap_or(Value::Null))
}

async fn read_body(req: Request<Incoming>) -> Result<Bytes, Response<Full<Bytes>>> {
    req.collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|_| error_json(CODE_BAD_REQUEST, "failed to read request body"))
}

async fn shard_unavailable(partitions: &PartitionTable, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let body = match read_body(req).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    match serde_json::from_slice::<Vec<u32>>(&body) {
        Ok(shards) => {
            partitions.set_unavailable_shards(shards);
            ok_json(Value::Null)
        }
        Err(err) => error_json(CODE_BAD_REQUEST, format!("body must be a JSON array of shard ids: {err}")),
    }
}

/// Body is the JSON array of partition hashes this node should keep mounted.
/// Anything mounted outside that set is removed from disk bookkeeping and
/// its meta-info entry dropped.
async fn clean_partitions(partitions: &PartitionTable, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let body = match read_body(req).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    match serde_json::from_slice::<Vec<u64>>(&body) {
        Ok(keep) => {
            let removed = partitions.clean_unused_partitions(&keep.into_iter().collect());
            ok_json(serde_json::to_value(removed).unwrap_or(Value::Null))
        }
        Err(err) => error_json(
            CODE_BAD_REQUEST,
            format!("body must be a JSON array of partition hashes to keep: {err}"),
        ),
    }
}

fn monitor_switch(partitions: &PartitionTable, params: &HashMap<String, String>) -> Response<Full<Bytes>> {
    match require(params, "switch_flag") {
        Some("enable") => {
            partitions.monitor_switch(true);
            ok_json(Value::Null)
        }
        Some("disable") => {
            partitions.monitor_switch(false);
            ok_json(Value::Null)
        }
        _ => error_json(CODE_BAD_REQUEST, "switch_flag must be 'enable' or 'disable'"),
    }
}

/// `config_name`/`config_data` pairs feed the matching payload through
/// `ConfigStore::apply_manual`, the same distinct path `laser_client`'s
/// manual-override tooling would use rather than waiting on the next
/// registry push. `cluster_info_data` additionally flips on manual-override
/// mode, since `ConfigStore::cluster_info` only consults the override layer
/// once that flag is set.
async fn update_configs(config: &ConfigStore, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let body = match read_body(req).await {
        Ok(body) => body,
        Err(response) => return response,
    };
    let form: HashMap<String, String> = url::form_urlencoded::parse(&body).into_owned().collect();

    let (Some(config_name), Some(config_data)) =
        (form.get("config_name"), form.get("config_data"))
    else {
        return error_json(CODE_BAD_REQUEST, "missing config_name/config_data");
    };

    let mut overrides = ManualOverrides::default();
    let result = match config_name.as_str() {
        "database_table_schema_data" => {
            DatabaseTableSchemaData::parse(config_data).map(|v| overrides.database_table_schema_data = Some(v))
        }
        "cluster_info_data" => ClusterInfo::parse(config_data).map(|v| overrides.cluster_info_data = Some(v)),
        "node_config_list_data" => {
            NodeConfigList::parse(config_data).map(|v| overrides.node_config_list_data = Some(v))
        }
        "rocksdb_node_configs_data" => {
            RocksdbNodeConfigs::parse(config_data).map(|v| overrides.rocksdb_node_configs_data = Some(v))
        }
        "table_config_list_data" => {
            TableConfigList::parse(config_data).map(|v| overrides.table_config_list_data = Some(v))
        }
        "traffic_restriction_data" => {
            TrafficRestrictionData::parse(config_data).map(|v| overrides.traffic_restriction_data = Some(v))
        }
        other => return error_json(CODE_BAD_REQUEST, format!("unknown config_name '{other}'")),
    };

    if let Err(err) = result {
        return error_json(CODE_BAD_REQUEST, format!("invalid config_data: {err}"));
    }

    if config_name.as_str() == "cluster_info_data" {
        config.set_manual_override(true);
    }
    config.apply_manual(overrides);
    ok_json(Value::Null)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::layout::Layout;
    use std::sync::Arc;

    fn table() -> Arc<PartitionTable> {
        let dir = tempfile::tempdir().unwrap();
        let layout = Arc::new(Layout::new(dir.path(), dir.path(), "g", 1));
        Arc::new(PartitionTable::new(layout))
    }

    #[test]
    fn update_base_requires_all_params() {
        let table = table();
        let response = update_base(&table, &HashMap::new());
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn monitor_switch_rejects_unknown_flag() {
        let table = table();
        let mut params = HashMap::new();
        params.insert("switch_flag".to_string(), "sideways".to_string());
        let response = monitor_switch(&table, &params);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn monitor_switch_disables_then_enables() {
        let table = table();
        let mut params = HashMap::new();
        params.insert("switch_flag".to_string(), "disable".to_string());
        monitor_switch(&table, &params);
        assert!(!table.monitor_enabled());

        params.insert("switch_flag".to_string(), "enable".to_string());
        monitor_switch(&table, &params);
        assert!(table.monitor_enabled());
    }

    #[test]
    fn db_meta_reports_zero_partitions_for_unknown_table() {
        let table = table();
        let mut params = HashMap::new();
        params.insert("database_name".to_string(), "t".to_string());
        params.insert("table_name".to_string(), "u".to_string());
        let response = db_meta(&table, &params);
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn shard_list_empty_when_no_partitions_mounted() {
        let table = table();
        let config = ConfigStore::default();
        let response = shard_list(&table, &config);
        assert_eq!(response.status(), StatusCode::OK);
    }
}
