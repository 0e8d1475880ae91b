// SPDX-License-Identifier: AGPL-3.0-or-later
//! Names shared between pipelines and the cluster objects they manage

pub const CASSANDRA: &str = "cassandra";
pub const CASSANDRA_CLUSTER: &str = "cassandra-cluster";

pub const KUBE_HOSTNAME: &str = "kubernetes.io/hostname";

// label keys
pub const NAME: &str = "name";
pub const SERVICE: &str = "service";
pub const APP: &str = "app";
pub const MICROSERVICE: &str = "microservice";

pub const APP_NAME: &str = "app.kubernetes.io/name";
pub const APP_INSTANCE: &str = "app.kubernetes.io/instance";
pub const APP_VERSION: &str = "app.kubernetes.io/version";
pub const APP_COMPONENT: &str = "app.kubernetes.io/component";
pub const APP_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const APP_TECHNOLOGY: &str = "app.kubernetes.io/technology";
pub const APP_PART_OF: &str = "app.kubernetes.io/part-of";

// secret keys
pub const USERNAME: &str = "username";
pub const PASSWORD: &str = "password";
pub const ROLES: &str = "roles";
pub const ACCESS_KEY: &str = "accessKey";
pub const SECRET_KEY: &str = "secretKey";
pub const REGION: &str = "region";

pub const SSH_SECRET: &str = "ssh-keys";
pub const SSH_PUBLIC_KEY: &str = "publicKey";
pub const SSH_PRIVATE_KEY: &str = "privateKey";

pub const BACKUP: &str = "backup";
pub const BACKUP_DAEMON: &str = "cassandra-backup-daemon";
pub const BACKUP_STORAGE: &str = "backup-storage";
pub const BACKUP_ENTRYPOINT: &str = "/opt/backup/run.sh";
pub const MAJOR_VERSION_CONFIG: &str = "cassandra-major-version";

pub const DBAAS: &str = "dbaas";
pub const DBAAS_NAME: &str = "dbaas-cassandra-adapter";
pub const DBAAS_ADMIN_ROLE_CREDS: &str = "dbaas-streaming-role";

pub const ROBOT: &str = "robot-tests";
pub const ROBOT_ENTRYPOINT: &str = "/docker-entrypoint.sh";

pub const ROOT_CERT: &str = "root-ca";
pub const ROOT_CERT_PATH: &str = "/usr/ssl/";
pub const SERVER_CERTS_PATH: &str = "/certs/";

/// Characters vault may use when generating service passwords
pub const CHARSET: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of vault-generated service passwords
pub const PASSWORD_LENGTH: usize = 10;

pub fn http_port(tls_enabled: bool) -> i32 {
    if tls_enabled {
        8443
    } else {
        8080
    }
}

pub fn http_protocol(tls_enabled: bool) -> &'static str {
    if tls_enabled {
        "https"
    } else {
        "http"
    }
}
