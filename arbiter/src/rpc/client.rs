//! A reqwest-backed JSON-RPC client implementing both chain interfaces.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::error::Error;
use crate::transaction::Amount;
use crate::transaction::Hash256;
use crate::transaction::Utxo;
use crate::transaction::WithdrawRecord;

use super::BlockInfo;
use super::MainChainRpc;
use super::SideChainRpc;

/// A JSON-RPC 2.0 client for a single chain node.
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    http: reqwest::Client,
    endpoint: Url,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl JsonRpcClient {
    /// Create a client for the given endpoint with a per-request
    /// timeout.
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::RpcTransport)?;
        Ok(Self { http, endpoint })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, Error> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response: RpcResponse<T> = self
            .http
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(Error::RpcTransport)?
            .json()
            .await
            .map_err(Error::RpcTransport)?;

        if let Some(error) = response.error {
            return Err(Error::Rpc { code: error.code, message: error.message });
        }
        response.result.ok_or(Error::RpcResponse("missing result"))
    }
}

/// The shape `listunspent` rows arrive in; amounts are decimal strings.
#[derive(Debug, Deserialize)]
struct UtxoInfo {
    txid: String,
    vout: u16,
    amount: String,
}

impl MainChainRpc for JsonRpcClient {
    async fn get_current_height(&self) -> Result<u32, Error> {
        self.call("getcurrentheight", json!({})).await
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<Hash256, Error> {
        let txid: String = self
            .call("sendrawtransaction", json!({ "data": hex::encode(raw) }))
            .await?;
        Hash256::from_hex(&txid)
    }

    async fn get_unspent_outputs(&self, address: &str) -> Result<Vec<Utxo>, Error> {
        let rows: Vec<UtxoInfo> = self
            .call("listunspent", json!({ "addresses": [address] }))
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(Utxo {
                    txid: Hash256::from_hex(&row.txid)?,
                    vout: row.vout,
                    value: row.amount.parse::<Amount>()?,
                })
            })
            .collect()
    }

    async fn get_exist_withdraw_transactions(
        &self,
        hashes: &[Hash256],
    ) -> Result<Vec<Hash256>, Error> {
        let txs: Vec<String> = hashes.iter().map(Hash256::to_string).collect();
        let found: Vec<String> = self
            .call("getexistwithdrawtransactions", json!({ "txs": txs }))
            .await?;
        found.iter().map(|s| Hash256::from_hex(s)).collect()
    }
}

impl SideChainRpc for JsonRpcClient {
    async fn get_current_height(&self) -> Result<u32, Error> {
        self.call("getcurrentheight", json!({})).await
    }

    async fn get_block_by_height(&self, height: u32) -> Result<BlockInfo, Error> {
        self.call("getblockbyheight", json!({ "height": height })).await
    }

    async fn send_recharge_transaction(&self, main_tx_hash: &Hash256) -> Result<(), Error> {
        let _txid: serde_json::Value = self
            .call(
                "sendrechargetransaction",
                json!({ "txid": main_tx_hash.to_string() }),
            )
            .await?;
        Ok(())
    }

    async fn get_exist_deposit_transactions(
        &self,
        hashes: &[Hash256],
    ) -> Result<Vec<Hash256>, Error> {
        let txs: Vec<String> = hashes.iter().map(Hash256::to_string).collect();
        let found: Vec<String> = self
            .call("getexistdeposittransactions", json!({ "txs": txs }))
            .await?;
        found.iter().map(|s| Hash256::from_hex(s)).collect()
    }

    async fn get_withdraw_transaction(
        &self,
        side_tx_hash: &Hash256,
    ) -> Result<Option<WithdrawRecord>, Error> {
        self.call(
            "getwithdrawtransaction",
            json!({ "txid": side_tx_hash.to_string() }),
        )
        .await
    }

    async fn submit_illegal_data(&self, raw: &[u8]) -> Result<(), Error> {
        let _ack: serde_json::Value = self
            .call(
                "submitsidechainillegaldata",
                json!({ "illegaldata": hex::encode(raw) }),
            )
            .await?;
        Ok(())
    }
}
