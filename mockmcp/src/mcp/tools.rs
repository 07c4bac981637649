//! The mock tools: a fixed catalog of CRUD-ish operations over a [`DataStore`].
use super::catalog::{ToolCatalog, ToolDescriptor, ToolError, ToolExecutor};
use super::store::DataStore;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Mutex;
use strum::{EnumIter, EnumString, IntoEnumIterator};
use tracing::*;

/// Every tool the toolbox knows.  The wire name is the snake_case form of the variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumString, EnumIter, strum::Display)]
#[strum(serialize_all = "snake_case")]
enum Tool {
    GetUsers,
    GetUser,
    CreateUser,
    GetPosts,
    CreatePost,
    GetProducts,
    GetOrders,
    CreateOrder,
    GetStats,
}

impl Tool {
    fn description(self) -> &'static str {
        match self {
            Tool::GetUsers => "List users, optionally filtered by role",
            Tool::GetUser => "Get a single user by id",
            Tool::CreateUser => "Create a new user",
            Tool::GetPosts => "List posts, optionally only those by one user",
            Tool::CreatePost => "Create a new post on behalf of a user",
            Tool::GetProducts => "List products, optionally filtered by category and availability",
            Tool::GetOrders => "List orders, optionally only those placed by one user",
            Tool::CreateOrder => "Place an order for a product, reducing its stock",
            Tool::GetStats => "Summary statistics over all stored data",
        }
    }

    fn input_schema(self) -> Value {
        let (properties, required) = match self {
            Tool::GetUsers => (
                json!({
                    "role": {"type": "string", "description": "Only users with this role"},
                    "limit": {"type": "integer", "description": "Maximum number of users", "minimum": 1}
                }),
                json!([]),
            ),
            Tool::GetUser => (
                json!({"id": {"type": "integer", "description": "User id"}}),
                json!(["id"]),
            ),
            Tool::CreateUser => (
                json!({
                    "name": {"type": "string"},
                    "email": {"type": "string"},
                    "role": {"type": "string", "default": "user"}
                }),
                json!(["name", "email"]),
            ),
            Tool::GetPosts => (
                json!({"userId": {"type": "integer", "description": "Only posts by this user"}}),
                json!([]),
            ),
            Tool::CreatePost => (
                json!({
                    "userId": {"type": "integer"},
                    "title": {"type": "string"},
                    "body": {"type": "string"}
                }),
                json!(["userId", "title", "body"]),
            ),
            Tool::GetProducts => (
                json!({
                    "category": {"type": "string"},
                    "inStock": {"type": "boolean"}
                }),
                json!([]),
            ),
            Tool::GetOrders => (
                json!({"userId": {"type": "integer"}}),
                json!([]),
            ),
            Tool::CreateOrder => (
                json!({
                    "userId": {"type": "integer"},
                    "productId": {"type": "integer"},
                    "quantity": {"type": "integer", "minimum": 1}
                }),
                json!(["userId", "productId", "quantity"]),
            ),
            Tool::GetStats => (json!({}), json!([])),
        };

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    fn descriptor(self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

#[derive(Deserialize)]
struct GetUsersArgs {
    role: Option<String>,
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct GetUserArgs {
    id: u64,
}

#[derive(Deserialize)]
struct CreateUserArgs {
    name: String,
    email: String,
    role: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserFilterArgs {
    user_id: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePostArgs {
    user_id: u64,
    title: String,
    body: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetProductsArgs {
    category: Option<String>,
    in_stock: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrderArgs {
    user_id: u64,
    product_id: u64,
    quantity: u64,
}

/// Implements both [`ToolCatalog`] and [`ToolExecutor`] over an in-memory store.
#[derive(Debug, Default)]
pub struct MockToolbox {
    store: Mutex<DataStore>,
}

impl MockToolbox {
    pub fn new(store: DataStore) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    fn run(&self, tool: Tool, arguments: Map<String, Value>) -> Result<Value, ToolError> {
        validate_arguments(&tool.input_schema(), &arguments)?;

        let mut store = self.store.lock().unwrap();
        let result = match tool {
            Tool::GetUsers => {
                let args: GetUsersArgs = parse_arguments(arguments)?;
                to_value(store.users(args.role.as_deref(), args.limit))
            }
            Tool::GetUser => {
                let args: GetUserArgs = parse_arguments(arguments)?;
                to_value(store.user(args.id)?)
            }
            Tool::CreateUser => {
                let args: CreateUserArgs = parse_arguments(arguments)?;
                if !args.email.contains('@') {
                    return Err(ToolError::InvalidArgument {
                        name: "email".to_string(),
                        expected: "an email address".to_string(),
                    });
                }
                let role = args.role.unwrap_or_else(|| "user".to_string());
                to_value(store.insert_user(args.name, args.email, role))
            }
            Tool::GetPosts => {
                let args: UserFilterArgs = parse_arguments(arguments)?;
                to_value(store.posts(args.user_id))
            }
            Tool::CreatePost => {
                let args: CreatePostArgs = parse_arguments(arguments)?;
                to_value(store.insert_post(args.user_id, args.title, args.body)?)
            }
            Tool::GetProducts => {
                let args: GetProductsArgs = parse_arguments(arguments)?;
                to_value(store.products(args.category.as_deref(), args.in_stock))
            }
            Tool::GetOrders => {
                let args: UserFilterArgs = parse_arguments(arguments)?;
                to_value(store.orders(args.user_id))
            }
            Tool::CreateOrder => {
                let args: CreateOrderArgs = parse_arguments(arguments)?;
                to_value(store.insert_order(args.user_id, args.product_id, args.quantity)?)
            }
            Tool::GetStats => to_value(store.stats()),
        };

        Ok(result)
    }
}

impl ToolCatalog for MockToolbox {
    fn list_tools(&self) -> Vec<ToolDescriptor> {
        Tool::iter().map(Tool::descriptor).collect()
    }
}

#[async_trait::async_trait]
impl ToolExecutor for MockToolbox {
    #[instrument(skip(self, arguments))]
    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<Value, ToolError> {
        let tool: Tool = name
            .parse()
            .map_err(|_| ToolError::UnknownTool(name.to_string()))?;

        self.run(tool, arguments).inspect_err(|e| {
            debug!(error = %e, "Tool call failed");
        })
    }
}

/// Check `arguments` against the parts of a JSON schema the tools use: required properties and
/// primitive property types.
fn validate_arguments(schema: &Value, arguments: &Map<String, Value>) -> Result<(), ToolError> {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if arguments.get(name).map_or(true, Value::is_null) {
                return Err(ToolError::MissingArgument(name.to_string()));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (name, value) in arguments {
        // Unknown arguments are ignored, as are explicit nulls for optional ones
        let Some(property) = properties.get(name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }

        let expected = property.get("type").and_then(Value::as_str).unwrap_or("any");
        let type_ok = match expected {
            "string" => value.is_string(),
            "integer" => value.is_u64() || value.is_i64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };
        let minimum_ok = match (property.get("minimum").and_then(Value::as_i64), value.as_i64()) {
            (Some(minimum), Some(value)) => value >= minimum,
            _ => true,
        };
        // Ids and counts are never negative
        let sign_ok = expected != "integer" || value.is_u64();

        if !type_ok || !minimum_ok || !sign_ok {
            let expected = match property.get("minimum") {
                Some(minimum) => format!("{} >= {}", expected, minimum),
                None if expected == "integer" => "non-negative integer".to_string(),
                None => expected.to_string(),
            };
            return Err(ToolError::InvalidArgument {
                name: name.clone(),
                expected,
            });
        }
    }

    Ok(())
}

fn parse_arguments<T: DeserializeOwned>(arguments: Map<String, Value>) -> Result<T, ToolError> {
    // Nulls stand in for omitted optional arguments
    let arguments: Map<String, Value> = arguments
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .collect();

    serde_json::from_value(Value::Object(arguments)).map_err(|e| {
        // Validation already caught anything a client could reasonably get wrong
        warn!(error = %e, "Arguments passed validation but failed to deserialize");
        ToolError::InvalidArgument {
            name: "arguments".to_string(),
            expected: e.to_string(),
        }
    })
}

fn to_value<T: serde::Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        error!(error = %e, "Failed to serialize tool result");
        Value::Null
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test arguments must be an object"),
        }
    }

    #[test]
    fn catalog_lists_every_tool_in_a_stable_order() {
        let toolbox = MockToolbox::default();
        let tools = toolbox.list_tools();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "get_users",
                "get_user",
                "create_user",
                "get_posts",
                "create_post",
                "get_products",
                "get_orders",
                "create_order",
                "get_stats"
            ]
        );
        assert_eq!(tools, toolbox.list_tools());
        assert_eq!(tools[1].input_schema["required"], json!(["id"]));
    }

    #[tokio::test]
    async fn unknown_tool() {
        let toolbox = MockToolbox::default();
        let err = toolbox
            .call_tool("no_such_tool", Map::new())
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::UnknownTool("no_such_tool".to_string()));
        assert!(err.to_string().contains("no_such_tool"));
    }

    #[tokio::test]
    async fn get_user_by_id() {
        let toolbox = MockToolbox::default();
        let user = toolbox
            .call_tool("get_user", args(json!({"id": 2})))
            .await
            .unwrap();
        assert_eq!(user["name"], "Bob Smith");
        assert!(user["createdAt"].is_string());

        assert_matches!(
            toolbox.call_tool("get_user", args(json!({"id": 42}))).await,
            Err(ToolError::NotFound { entity: "User", id: 42 })
        );
    }

    #[tokio::test]
    async fn validation_happens_before_mutation() {
        let toolbox = MockToolbox::default();
        let before = toolbox.call_tool("get_stats", Map::new()).await.unwrap();

        assert_matches!(
            toolbox
                .call_tool("create_user", args(json!({"name": "Eve"})))
                .await,
            Err(ToolError::MissingArgument(name)) if name == "email"
        );
        assert_matches!(
            toolbox
                .call_tool("create_user", args(json!({"name": 7, "email": "e@x.io"})))
                .await,
            Err(ToolError::InvalidArgument { name, .. }) if name == "name"
        );
        assert_matches!(
            toolbox
                .call_tool("create_user", args(json!({"name": "Eve", "email": "nope"})))
                .await,
            Err(ToolError::InvalidArgument { name, .. }) if name == "email"
        );
        assert_matches!(
            toolbox
                .call_tool(
                    "create_order",
                    args(json!({"userId": 1, "productId": 1, "quantity": 0}))
                )
                .await,
            Err(ToolError::InvalidArgument { name, .. }) if name == "quantity"
        );
        assert_matches!(
            toolbox
                .call_tool(
                    "create_order",
                    args(json!({"userId": 1, "productId": 1, "quantity": 500}))
                )
                .await,
            Err(ToolError::InsufficientStock { requested: 500, available: 15, .. })
        );
        assert_matches!(
            toolbox
                .call_tool("get_user", args(json!({"id": -1})))
                .await,
            Err(ToolError::InvalidArgument { .. })
        );

        let after = toolbox.call_tool("get_stats", Map::new()).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn create_then_read_back() {
        let toolbox = MockToolbox::default();
        let user = toolbox
            .call_tool(
                "create_user",
                args(json!({"name": "Eve", "email": "eve@example.com", "role": null})),
            )
            .await
            .unwrap();
        assert_eq!(user["role"], "user");

        let post = toolbox
            .call_tool(
                "create_post",
                args(json!({"userId": user["id"], "title": "Hi", "body": "First!"})),
            )
            .await
            .unwrap();
        assert_eq!(post["userId"], user["id"]);

        let posts = toolbox
            .call_tool("get_posts", args(json!({"userId": user["id"]})))
            .await
            .unwrap();
        assert_eq!(posts.as_array().map(Vec::len), Some(1));

        let order = toolbox
            .call_tool(
                "create_order",
                args(json!({"userId": user["id"], "productId": 3, "quantity": 2})),
            )
            .await
            .unwrap();
        assert_eq!(order["total"], json!(24.0));

        let stats = toolbox.call_tool("get_stats", Map::new()).await.unwrap();
        assert_eq!(stats["totalUsers"], 5);
        assert_eq!(stats["totalOrders"], 4);
    }

    #[tokio::test]
    async fn product_filters() {
        let toolbox = MockToolbox::default();
        let products = toolbox
            .call_tool(
                "get_products",
                args(json!({"category": "electronics", "inStock": true})),
            )
            .await
            .unwrap();
        assert_eq!(products.as_array().map(Vec::len), Some(2));

        let users = toolbox
            .call_tool("get_users", args(json!({"limit": 2})))
            .await
            .unwrap();
        assert_eq!(users.as_array().map(Vec::len), Some(2));
    }
}
