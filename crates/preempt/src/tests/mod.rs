mod critical;
