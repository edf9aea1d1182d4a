use async_trait::async_trait;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use threadly_client::{
    api::{
        self, CommentId, EditComment, NewComment, PostId, ReactionCounts, ReactionRequest,
        ReplyPage, ReplyQuery, TopLevelPage, TopLevelQuery,
    },
    Transport,
};

const READ_RETRIES: u32 = 3;

lazy_static::lazy_static! {
    // only reads are idempotent, mutations go through WRITE_CLIENT and are never retried
    static ref READ_CLIENT: ClientWithMiddleware = ClientBuilder::new(reqwest::Client::new())
        .with(RetryTransientMiddleware::new_with_policy(
            ExponentialBackoff::builder().build_with_max_retries(READ_RETRIES),
        ))
        .build();
    static ref WRITE_CLIENT: reqwest::Client = reqwest::Client::new();
}

pub struct HttpTransport {
    host: String,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(host: String, token: Option<String>) -> HttpTransport {
        HttpTransport {
            host: String::from(host.trim_end_matches('/')),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{path}", self.host)
    }

    async fn get<Q, R>(&self, path: &str, query: &Q) -> Result<R, api::Error>
    where
        Q: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let mut req = READ_CLIENT.get(self.url(path)).query(query);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.map_err(|e| {
            tracing::warn!(path, err = %e, "read request failed");
            api::Error::Network(e.to_string())
        })?;
        parse(resp).await
    }

    async fn write(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&impl serde::Serialize>,
    ) -> Result<reqwest::Response, api::Error> {
        let token = self.token.as_ref().ok_or(api::Error::PermissionDenied)?;
        let mut req = WRITE_CLIENT
            .request(method.clone(), self.url(path))
            .bearer_auth(token);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await.map_err(|e| {
            tracing::warn!(%method, path, err = %e, "write request failed");
            api::Error::Network(e.to_string())
        })?;
        tracing::debug!(%method, path, status = %resp.status(), "write request answered");
        Ok(resp)
    }
}

async fn body(resp: reqwest::Response) -> Result<Vec<u8>, api::Error> {
    let status = resp.status();
    let body = resp
        .bytes()
        .await
        .map_err(|e| api::Error::Network(e.to_string()))?;
    if !status.is_success() {
        return Err(api::Error::from_response(status, &body));
    }
    Ok(body.to_vec())
}

async fn parse<R: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<R, api::Error> {
    let body = body(resp).await?;
    serde_json::from_slice(&body)
        .map_err(|e| api::Error::Unknown(format!("parsing server answer: {e}")))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch_top_level(
        &self,
        post: &PostId,
        q: &TopLevelQuery,
    ) -> Result<TopLevelPage, api::Error> {
        self.get(&format!("posts/{post}/comments"), q).await
    }

    async fn fetch_replies(
        &self,
        parent: &CommentId,
        q: &ReplyQuery,
    ) -> Result<ReplyPage, api::Error> {
        self.get(&format!("comments/{parent}/replies"), q).await
    }

    async fn create_comment(
        &self,
        post: &PostId,
        body: &NewComment,
    ) -> Result<api::Comment, api::Error> {
        let path = format!("posts/{post}/comments");
        parse(self.write(reqwest::Method::POST, &path, Some(body)).await?).await
    }

    async fn reply(
        &self,
        parent: &CommentId,
        body: &NewComment,
    ) -> Result<api::Comment, api::Error> {
        let path = format!("comments/{parent}/replies");
        parse(self.write(reqwest::Method::POST, &path, Some(body)).await?).await
    }

    async fn edit(&self, id: &CommentId, body: &EditComment) -> Result<api::Comment, api::Error> {
        let path = format!("comments/{id}");
        parse(self.write(reqwest::Method::PATCH, &path, Some(body)).await?).await
    }

    async fn delete(&self, id: &CommentId) -> Result<(), api::Error> {
        let path = format!("comments/{id}");
        body(self.write(reqwest::Method::DELETE, &path, None::<&()>).await?).await?;
        Ok(())
    }

    async fn react(
        &self,
        id: &CommentId,
        req: &ReactionRequest,
    ) -> Result<ReactionCounts, api::Error> {
        let path = format!("comments/{id}/reactions");
        parse(self.write(reqwest::Method::POST, &path, Some(req)).await?).await
    }
}
